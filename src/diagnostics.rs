//! Persistent diagnostics log.
//!
//! Lifecycle events and absorbed errors are appended to a durable log queue
//! (the log table next to the location table) so they survive restarts and
//! can be inspected or drained by the host. Entries are mirrored to
//! `tracing` for live observability; the queue is the durable copy.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::queue::RecordQueue;
use crate::types::{decode_versioned, encode_versioned, CodecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Verbose,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Verbose => "verbose",
        }
    }
}

/// One durable log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Seconds since the Unix epoch, UTC.
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            level,
            message: message.into(),
        }
    }
}

impl crate::queue::QueueRecord for LogEntry {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_versioned(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_versioned(bytes)
    }
}

/// Append-only view over the log queue.
#[derive(Clone)]
pub struct DiagnosticsLog {
    queue: Arc<dyn RecordQueue<LogEntry>>,
}

impl DiagnosticsLog {
    pub fn new(queue: Arc<dyn RecordQueue<LogEntry>>) -> Self {
        Self { queue }
    }

    /// Append one entry. A storage failure here is itself only logged;
    /// diagnostics must never take the collector down.
    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry::new(level, message);
        if let Err(e) = self.queue.add(&entry) {
            warn!(error = %e, "could not persist diagnostics entry");
        }
    }

    pub fn count(&self) -> i64 {
        self.queue.count()
    }

    /// Drain all buffered entries, oldest first.
    pub fn pop_all(&self) -> Vec<LogEntry> {
        self.queue.pop_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DurableQueue, MemoryQueue};

    #[test]
    fn entries_drain_in_order() {
        let queue = Arc::new(MemoryQueue::new());
        let log = DiagnosticsLog::new(queue);

        log.record(LogLevel::Info, "tracking started");
        log.record(LogLevel::Warn, "upload failed, requeued 3 records");

        assert_eq!(log.count(), 2);

        let entries = log.pop_all();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "tracking started");
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn log_entries_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store");

        {
            let db = sled::open(&path).unwrap();
            let log = DiagnosticsLog::new(Arc::new(DurableQueue::open(&db, "logs").unwrap()));
            log.record(LogLevel::Error, "simulated storage hiccup");
            db.flush().unwrap();
        }

        {
            let db = sled::open(&path).unwrap();
            let log = DiagnosticsLog::new(Arc::new(DurableQueue::open(&db, "logs").unwrap()));
            assert_eq!(log.count(), 1);
            assert_eq!(log.pop_all()[0].message, "simulated storage hiccup");
        }
    }
}
