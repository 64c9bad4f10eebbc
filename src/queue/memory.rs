//! Volatile in-memory queue.
//!
//! Fallback used when the durable store fails to open (for example the data
//! directory is unavailable). Same contract as the durable queue, backed by
//! an ordered Vec; buffered records do not survive a restart.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{IndexedRecord, RecordQueue, StorageError};

pub struct MemoryQueue<T> {
    entries: Mutex<Vec<IndexedRecord<T>>>,
    next_id: AtomicU64,
}

impl<T> MemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<IndexedRecord<T>>> {
        // A poisoned lock only means another thread panicked mid-append;
        // the Vec itself is still usable.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> RecordQueue<T> for MemoryQueue<T> {
    fn add(&self, record: &T) -> Result<(), StorageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, record.clone()));
        Ok(())
    }

    fn add_all(&self, records: &[T]) -> Result<(), StorageError> {
        let mut entries = self.lock();
        for record in records {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            entries.push((id, record.clone()));
        }
        Ok(())
    }

    fn count(&self) -> i64 {
        self.lock().len() as i64
    }

    fn first(&self) -> Option<IndexedRecord<T>> {
        self.lock().first().cloned()
    }

    fn all(&self) -> Vec<IndexedRecord<T>> {
        self.lock().clone()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn pop_all(&self) -> Vec<T> {
        // Single lock acquisition, so nothing can slip in between the read
        // and the removal.
        self.lock().drain(..).map(|(_, record)| record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_matches_durable_queue() {
        let queue: MemoryQueue<String> = MemoryQueue::new();

        queue.add(&"a".to_string()).unwrap();
        queue.add_all(&["b".to_string(), "c".to_string()]).unwrap();

        assert_eq!(queue.count(), 3);

        let entries = queue.all();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].1, "a");
        assert_eq!(entries[2].1, "c");
        assert!(entries[0].0 < entries[1].0 && entries[1].0 < entries[2].0);

        let (_, oldest) = queue.first().unwrap();
        assert_eq!(oldest, "a");

        let drained = queue.pop_all();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert_eq!(queue.count(), 0);
        assert!(queue.first().is_none());
    }

    #[test]
    fn ids_keep_increasing_after_clear() {
        let queue: MemoryQueue<u32> = MemoryQueue::new();

        queue.add(&1).unwrap();
        let (first_id, _) = queue.first().unwrap();
        queue.clear();

        queue.add(&2).unwrap();
        let (second_id, _) = queue.first().unwrap();
        assert!(second_id > first_id);
    }
}
