//! Sled-backed durable queue.
//!
//! Each queue lives in a named tree of the shared embedded database, so
//! the location and log queues coexist in one store the way two tables
//! would. Keys are storage-assigned monotonic ids (`Db::generate_id`)
//! encoded big-endian, so lexicographic key order is insertion order.
//! Opening a tree is idempotent, with create-if-not-exists semantics.

use std::marker::PhantomData;

use tracing::{debug, error, warn};

use super::{IndexedRecord, QueueRecord, RecordQueue, StorageError, COUNT_UNAVAILABLE};

pub struct DurableQueue<T> {
    db: sled::Db,
    tree: sled::Tree,
    name: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: QueueRecord> DurableQueue<T> {
    /// Open (or lazily create) the queue tree named `name`.
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StorageError> {
        let tree = db.open_tree(name)?;
        debug!(queue = name, pending = tree.len(), "durable queue opened");
        Ok(Self {
            db: db.clone(),
            tree,
            name: name.to_string(),
            _record: PhantomData,
        })
    }

    fn decode_entry(&self, key: &[u8], value: &[u8]) -> Option<IndexedRecord<T>> {
        let id_bytes: [u8; 8] = key.try_into().ok()?;
        let id = u64::from_be_bytes(id_bytes);
        match T::decode(value) {
            Ok(record) => Some((id, record)),
            Err(e) => {
                error!(queue = %self.name, id, error = %e, "corrupted queue entry, removing");
                if let Err(remove_err) = self.tree.remove(key) {
                    warn!(queue = %self.name, id, error = %remove_err, "could not remove corrupted entry");
                }
                None
            }
        }
    }
}

impl<T: QueueRecord> RecordQueue<T> for DurableQueue<T> {
    fn add(&self, record: &T) -> Result<(), StorageError> {
        let blob = record.encode()?;
        let id = self.db.generate_id()?;
        self.tree.insert(id.to_be_bytes(), blob)?;
        Ok(())
    }

    fn add_all(&self, records: &[T]) -> Result<(), StorageError> {
        match records {
            [] => Ok(()),
            [record] => self.add(record),
            _ => {
                // Encode up front so a codec failure aborts before any write.
                let mut blobs = Vec::with_capacity(records.len());
                for record in records {
                    blobs.push(record.encode()?);
                }

                self.tree
                    .transaction(
                        |tx| -> sled::transaction::ConflictableTransactionResult<(), ()> {
                            for blob in &blobs {
                                let id = tx.generate_id()?;
                                tx.insert(&id.to_be_bytes()[..], blob.as_slice())?;
                            }
                            Ok(())
                        },
                    )
                    .map_err(|e| match e {
                        sled::transaction::TransactionError::Storage(err) => err.into(),
                        sled::transaction::TransactionError::Abort(()) => {
                            StorageError::Database("batch insert aborted".to_string())
                        }
                    })?;
                Ok(())
            }
        }
    }

    fn count(&self) -> i64 {
        i64::try_from(self.tree.len()).unwrap_or(COUNT_UNAVAILABLE)
    }

    fn first(&self) -> Option<IndexedRecord<T>> {
        match self.tree.first() {
            Ok(Some((key, value))) => self.decode_entry(&key, &value),
            Ok(None) => None,
            Err(e) => {
                warn!(queue = %self.name, error = %e, "queue peek failed");
                None
            }
        }
    }

    fn all(&self) -> Vec<IndexedRecord<T>> {
        let mut records = Vec::new();
        for item in self.tree.iter() {
            match item {
                Ok((key, value)) => {
                    if let Some(entry) = self.decode_entry(&key, &value) {
                        records.push(entry);
                    }
                }
                Err(e) => {
                    warn!(queue = %self.name, error = %e, "queue read failed mid-scan");
                    break;
                }
            }
        }
        records
    }

    fn clear(&self) {
        if let Err(e) = self.tree.clear() {
            error!(queue = %self.name, error = %e, "failed to clear queue");
        }
    }

    fn pop_all(&self) -> Vec<T> {
        // Remove exactly the keys that were read, so an entry appended
        // between the scan and the deletes is never lost.
        let entries = self.all();
        let mut records = Vec::with_capacity(entries.len());
        for (id, record) in entries {
            if let Err(e) = self.tree.remove(id.to_be_bytes()) {
                warn!(queue = %self.name, id, error = %e, "could not remove drained entry");
            }
            records.push(record);
        }
        records
    }
}
