//! Pending-record queues: the durable buffer between collection and upload.
//!
//! Records (locations or log lines) are appended in arrival order, each
//! under a storage-assigned, strictly increasing sequence id. The uploader
//! drains the whole queue with `pop_all` before attempting a POST, so fixes
//! arriving mid-upload land in a fresh queue and are neither blocked nor
//! lost.
//!
//! Two implementations share the contract: `DurableQueue` (sled-backed,
//! survives restarts) and `MemoryQueue` (volatile fallback used when the
//! durable store fails to open). Callers hold the trait object and must not
//! care which one they got.

pub mod durable;
pub mod memory;

pub use durable::DurableQueue;
pub use memory::MemoryQueue;

use crate::types::CodecError;

/// Sentinel returned by `count` when the backing store cannot be read.
pub const COUNT_UNAVAILABLE: i64 = -1;

/// Storage errors. After a successful open these are logged and absorbed at
/// the call site; a storage hiccup must never crash the host process.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("storage codec error: {0}")]
    Codec(#[from] CodecError),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// A stored record paired with its storage-assigned sequence id.
pub type IndexedRecord<T> = (u64, T);

/// Conversion between a record and its stored blob.
pub trait QueueRecord: Sized + Send + Sync {
    fn encode(&self) -> Result<Vec<u8>, CodecError>;
    fn decode(bytes: &[u8]) -> Result<Self, CodecError>;
}

/// Contract shared by the durable and in-memory queues.
pub trait RecordQueue<T>: Send + Sync {
    /// Persist one record. The error is surfaced so the caller can decide
    /// whether to log and move on (steady state) or fall back.
    fn add(&self, record: &T) -> Result<(), StorageError>;

    /// Persist a batch. For more than one record all inserts run in a
    /// single transaction; if any insert fails nothing is written.
    fn add_all(&self, records: &[T]) -> Result<(), StorageError>;

    /// Number of stored entries, or `COUNT_UNAVAILABLE` on read failure.
    fn count(&self) -> i64;

    /// Cheap peek at the oldest entry, used for the queue-age check.
    fn first(&self) -> Option<IndexedRecord<T>>;

    /// Non-destructive read of every entry, ascending by sequence id.
    fn all(&self) -> Vec<IndexedRecord<T>>;

    /// Delete all entries. Failures are logged, not surfaced.
    fn clear(&self);

    /// Drain the queue, returning records in insertion order. The one
    /// logical "pop" operation the uploader uses before a POST. Removes
    /// only the entries it read; a record appended concurrently with the
    /// drain stays queued for the next cycle.
    fn pop_all(&self) -> Vec<T>;
}
