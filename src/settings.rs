//! Small key-value settings store: the persisted "started" flag and the
//! runtime-adjustable transmission interval.
//!
//! The started flag is what lets a process restart resume collection
//! automatically. Backed by a named tree of the shared sled store, with an
//! in-memory variant for the durable-store-unavailable fallback path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::warn;

use crate::queue::StorageError;

const STARTED_KEY: &str = "is_started";
const TRANSMISSION_INTERVAL_KEY: &str = "transmission_interval_secs";

pub trait SettingsStore: Send + Sync {
    fn is_started(&self) -> bool;
    fn set_started(&self, started: bool);

    /// Persisted transmission interval, if one was ever set at runtime.
    fn transmission_interval_secs(&self) -> Option<u64>;
    fn set_transmission_interval_secs(&self, secs: u64);
}

/// Sled-backed settings tree. Read failures default to "not set" and write
/// failures are logged; settings are advisory state, never worth crashing
/// the host over.
pub struct SledSettings {
    tree: sled::Tree,
}

impl SledSettings {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(name)?,
        })
    }

    fn read_u64(&self, key: &str) -> Option<u64> {
        match self.tree.get(key) {
            Ok(Some(value)) => {
                let bytes: [u8; 8] = value.as_ref().try_into().ok()?;
                Some(u64::from_be_bytes(bytes))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "settings read failed");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &[u8]) {
        if let Err(e) = self.tree.insert(key, value) {
            warn!(key, error = %e, "settings write failed");
        }
    }
}

impl SettingsStore for SledSettings {
    fn is_started(&self) -> bool {
        matches!(self.tree.get(STARTED_KEY), Ok(Some(value)) if value.as_ref() == [1])
    }

    fn set_started(&self, started: bool) {
        self.write(STARTED_KEY, &[u8::from(started)]);
    }

    fn transmission_interval_secs(&self) -> Option<u64> {
        self.read_u64(TRANSMISSION_INTERVAL_KEY)
    }

    fn set_transmission_interval_secs(&self, secs: u64) {
        self.write(TRANSMISSION_INTERVAL_KEY, &secs.to_be_bytes());
    }
}

/// Volatile settings for the in-memory fallback path.
#[derive(Default)]
pub struct MemorySettings {
    started: AtomicBool,
    // 0 means "never set"; a real interval of zero is rejected by config
    // validation.
    transmission_interval_secs: AtomicU64,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::SeqCst);
    }

    fn transmission_interval_secs(&self) -> Option<u64> {
        match self.transmission_interval_secs.load(Ordering::SeqCst) {
            0 => None,
            secs => Some(secs),
        }
    }

    fn set_transmission_interval_secs(&self, secs: u64) {
        self.transmission_interval_secs.store(secs, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sled_settings_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let db = sled::open(tmp.path().join("settings")).unwrap();
        let settings = SledSettings::open(&db, "settings").unwrap();

        assert!(!settings.is_started());
        assert_eq!(settings.transmission_interval_secs(), None);

        settings.set_started(true);
        settings.set_transmission_interval_secs(3600);

        assert!(settings.is_started());
        assert_eq!(settings.transmission_interval_secs(), Some(3600));

        settings.set_started(false);
        assert!(!settings.is_started());
    }

    #[test]
    fn started_flag_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings");

        {
            let db = sled::open(&path).unwrap();
            let settings = SledSettings::open(&db, "settings").unwrap();
            settings.set_started(true);
            db.flush().unwrap();
        }

        {
            let db = sled::open(&path).unwrap();
            let settings = SledSettings::open(&db, "settings").unwrap();
            assert!(settings.is_started());
        }
    }

    #[test]
    fn memory_settings_behave_like_sled_settings() {
        let settings = MemorySettings::new();

        assert!(!settings.is_started());
        assert_eq!(settings.transmission_interval_secs(), None);

        settings.set_started(true);
        settings.set_transmission_interval_secs(60);

        assert!(settings.is_started());
        assert_eq!(settings.transmission_interval_secs(), Some(60));
    }
}
