//! Public entry point. Owns the storage, wires the pipeline, and enforces
//! the preconditions for tracking.
//!
//! The tracker opens the durable store once at construction. If the store
//! cannot be opened (disk full, permissions, a stale lock from a crashed
//! sibling process) it falls back to in-memory buffering and keeps
//! collecting; durability is lost for that session but no fix is dropped
//! while the process lives.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Configuration;
use crate::diagnostics::{DiagnosticsLog, LogLevel};
use crate::error::TrackerError;
use crate::provider::{AdvertisingProvider, LocationProvider};
use crate::queue::{DurableQueue, MemoryQueue, RecordQueue};
use crate::scheduler::TaskScheduler;
use crate::service::{CollectionService, NetworkInfoProvider, NoNetworkInfo};
use crate::settings::{MemorySettings, SettingsStore, SledSettings};
use crate::types::LocationRecord;
use crate::uploader::{
    BackgroundLease, HttpPoster, LocationUploader, NoopLease, Postable, UploadOutcome,
};

const LOCATIONS_TREE: &str = "locations";
const LOGS_TREE: &str = "logs";
const SETTINGS_TREE: &str = "settings";

pub struct LocationTracker {
    config: Configuration,
    provider: Arc<dyn LocationProvider>,
    advertising: Arc<dyn AdvertisingProvider>,
    network: Arc<dyn NetworkInfoProvider>,
    lease: Arc<dyn BackgroundLease>,
    poster: Option<Arc<dyn Postable>>,
    queue: Arc<dyn RecordQueue<LocationRecord>>,
    settings: Arc<dyn SettingsStore>,
    diagnostics: DiagnosticsLog,
    scheduler: TaskScheduler,
    service: Mutex<Option<Arc<CollectionService>>>,
}

impl LocationTracker {
    /// Build a tracker over the durable store at `storage_path`.
    ///
    /// Never fails: if the store cannot be opened, buffering degrades to
    /// in-memory for this session and the failure is logged.
    pub fn new(
        config: Configuration,
        provider: Arc<dyn LocationProvider>,
        advertising: Arc<dyn AdvertisingProvider>,
        storage_path: impl AsRef<Path>,
    ) -> Self {
        let (queue, log_queue, settings) = match open_storage(storage_path.as_ref()) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "durable store unavailable, buffering in memory");
                (
                    Arc::new(MemoryQueue::new()) as Arc<dyn RecordQueue<LocationRecord>>,
                    Arc::new(MemoryQueue::new()) as Arc<dyn RecordQueue<crate::diagnostics::LogEntry>>,
                    Arc::new(MemorySettings::new()) as Arc<dyn SettingsStore>,
                )
            }
        };

        let scheduler = TaskScheduler::new(config.transmission_interval());
        Self {
            config,
            provider,
            advertising,
            network: Arc::new(NoNetworkInfo),
            lease: Arc::new(NoopLease),
            poster: None,
            queue,
            settings,
            diagnostics: DiagnosticsLog::new(log_queue),
            scheduler,
            service: Mutex::new(None),
        }
    }

    /// Attach a Wi-Fi fingerprint source.
    pub fn with_network_info(mut self, network: Arc<dyn NetworkInfoProvider>) -> Self {
        self.network = network;
        self
    }

    /// Attach a platform background-execution lease.
    pub fn with_background_lease(mut self, lease: Arc<dyn BackgroundLease>) -> Self {
        self.lease = lease;
        self
    }

    /// Replace the HTTP layer. For tests and hosts with their own client.
    pub fn with_poster(mut self, poster: Arc<dyn Postable>) -> Self {
        self.poster = Some(poster);
        self
    }

    /// Start collecting.
    ///
    /// Checked in order: an already-running session, configuration
    /// validity, the usage-description declaration, system-wide location
    /// services, and the permission grant. Must be called from within a
    /// tokio runtime.
    pub fn start_tracking(&self) -> Result<(), TrackerError> {
        let mut slot = lock_slot(&self.service);
        if slot.is_some() {
            return Err(TrackerError::AlreadyTracking);
        }

        self.config.validate()?;

        if !self.provider.usage_description_present() {
            return Err(TrackerError::MissingUsageDescription);
        }
        if !self.provider.services_enabled() {
            return Err(TrackerError::LocationDisabled);
        }
        if self.provider.authorization().is_denied() {
            return Err(TrackerError::Unauthorized);
        }

        let poster = match &self.poster {
            Some(poster) => Arc::clone(poster),
            None => {
                // A header that reqwest rejects is a configuration problem.
                let poster = HttpPoster::new(&self.config.url, &self.config.headers)
                    .map_err(|e| TrackerError::InvalidConfiguration(e.to_string()))?;
                Arc::new(poster) as Arc<dyn Postable>
            }
        };
        let uploader = Arc::new(LocationUploader::new(
            poster,
            Arc::clone(&self.queue),
            Arc::clone(&self.lease),
        ));

        let service = CollectionService::new(
            &self.config,
            Arc::clone(&self.queue),
            uploader,
            Arc::clone(&self.provider),
            Arc::clone(&self.advertising),
            Arc::clone(&self.network),
            Arc::clone(&self.settings),
            self.scheduler.clone(),
        );
        service.start();
        *slot = Some(service);

        self.diagnostics.record(LogLevel::Info, "tracking started");
        Ok(())
    }

    /// Stop collecting and flush the remaining buffer, best-effort. A stop
    /// without a running session is a logged no-op.
    pub fn stop_tracking(&self) {
        let service = lock_slot(&self.service).take();
        match service {
            Some(service) => {
                service.stop();
                self.diagnostics.record(LogLevel::Info, "tracking stopped");
            }
            None => warn!("stop_tracking called but tracking is not running"),
        }
    }

    pub fn is_tracking(&self) -> bool {
        lock_slot(&self.service).is_some()
    }

    /// Restart collection if a previous session was stopped by process
    /// death rather than `stop_tracking`. Returns whether it restarted.
    pub fn resume(&self) -> Result<bool, TrackerError> {
        if self.is_tracking() || !self.settings.is_started() {
            return Ok(false);
        }
        info!("previous session was tracking, resuming");
        self.start_tracking()?;
        Ok(true)
    }

    /// Records currently buffered, or -1 when the count is unavailable.
    pub fn buffered_count(&self) -> i64 {
        self.queue.count()
    }

    pub fn transmission_interval(&self) -> Duration {
        let secs = match lock_slot(&self.service).as_ref() {
            Some(service) => service.transmission_interval_secs(),
            None => self
                .settings
                .transmission_interval_secs()
                .unwrap_or(self.config.transmission_interval_secs),
        };
        Duration::from_secs(secs)
    }

    /// Adjust the transmission interval. Persisted, so it survives restarts
    /// and applies whether or not tracking is currently running.
    pub fn set_transmission_interval(&self, interval: Duration) {
        match lock_slot(&self.service).as_ref() {
            Some(service) => service.set_transmission_interval(interval),
            None => self
                .settings
                .set_transmission_interval_secs(interval.as_secs()),
        }
    }

    /// Force one upload cycle now, regardless of record age. `None` when
    /// tracking is not running.
    pub async fn flush(&self) -> Option<UploadOutcome> {
        let service = lock_slot(&self.service).as_ref().map(Arc::clone)?;
        Some(service.flush().await)
    }

    /// Flush on a timer even when no fixes arrive. No-op unless tracking.
    pub fn enable_periodic_flush(&self) {
        if let Some(service) = lock_slot(&self.service).as_ref() {
            service.enable_periodic_flush();
        }
    }

    pub fn disable_periodic_flush(&self) {
        if let Some(service) = lock_slot(&self.service).as_ref() {
            service.disable_periodic_flush();
        }
    }

    pub fn diagnostics(&self) -> &DiagnosticsLog {
        &self.diagnostics
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

type StorageParts = (
    Arc<dyn RecordQueue<LocationRecord>>,
    Arc<dyn RecordQueue<crate::diagnostics::LogEntry>>,
    Arc<dyn SettingsStore>,
);

fn open_storage(path: &Path) -> Result<StorageParts, crate::queue::StorageError> {
    let db = sled::open(path)?;
    let queue = DurableQueue::open(&db, LOCATIONS_TREE)?;
    let log_queue = DurableQueue::open(&db, LOGS_TREE)?;
    let settings = SledSettings::open(&db, SETTINGS_TREE)?;
    Ok((
        Arc::new(queue),
        Arc::new(log_queue),
        Arc::new(settings),
    ))
}

fn lock_slot<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
