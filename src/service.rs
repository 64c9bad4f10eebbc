//! Collection service: the orchestrator of the buffered-write /
//! scheduled-flush pipeline.
//!
//! Subscribes to the location provider, converts each incoming fix into a
//! `LocationRecord`, appends it to the queue, and decides when to flush:
//! either because the oldest buffered record has outlived the transmission
//! interval (checked on every fix), or because the host enabled the
//! explicit scheduler-driven periodic flush for long quiet stretches with
//! no incoming fixes.
//!
//! Queue writes run synchronously on the provider's callback thread (sled
//! writes are microseconds); only the network POST is asynchronous, spawned
//! onto the runtime captured at `start`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::Configuration;
use crate::provider::{AdvertisingProvider, CollectionProfile, FixHandler, LocationProvider};
use crate::queue::RecordQueue;
use crate::scheduler::{PeriodicTask, TaskId, TaskScheduler};
use crate::settings::SettingsStore;
use crate::types::{Fix, LocationContext, LocationRecord, NetworkInfo};
use crate::uploader::{LocationUploader, UploadOutcome};

/// Source of the optional Wi-Fi fingerprint attached to each record.
///
/// Network introspection is platform-specific; hosts that cannot (or choose
/// not to) provide it return `None` and the field stays null on the wire.
pub trait NetworkInfoProvider: Send + Sync {
    fn current_network(&self) -> Option<NetworkInfo>;
}

/// Provider for hosts without network introspection.
pub struct NoNetworkInfo;

impl NetworkInfoProvider for NoNetworkInfo {
    fn current_network(&self) -> Option<NetworkInfo> {
        None
    }
}

pub struct CollectionService {
    // Handed to the provider callback and the flush tasks; weak so neither
    // keeps the service (and its storage handles) alive past the tracker.
    weak: Weak<Self>,
    queue: Arc<dyn RecordQueue<LocationRecord>>,
    uploader: Arc<LocationUploader>,
    provider: Arc<dyn LocationProvider>,
    advertising: Arc<dyn AdvertisingProvider>,
    network: Arc<dyn NetworkInfoProvider>,
    settings: Arc<dyn SettingsStore>,
    scheduler: TaskScheduler,
    fields: crate::config::CollectingFields,
    profile: CollectionProfile,
    transmission_interval_secs: AtomicU64,
    started: AtomicBool,
    periodic_flush: Mutex<Option<TaskId>>,
    runtime: Mutex<Option<Handle>>,
}

impl CollectionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Configuration,
        queue: Arc<dyn RecordQueue<LocationRecord>>,
        uploader: Arc<LocationUploader>,
        provider: Arc<dyn LocationProvider>,
        advertising: Arc<dyn AdvertisingProvider>,
        network: Arc<dyn NetworkInfoProvider>,
        settings: Arc<dyn SettingsStore>,
        scheduler: TaskScheduler,
    ) -> Arc<Self> {
        // A runtime-adjusted interval persisted in a previous session wins
        // over the configured default.
        let interval_secs = settings
            .transmission_interval_secs()
            .unwrap_or(config.transmission_interval_secs);

        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            queue,
            uploader,
            provider,
            advertising,
            network,
            settings,
            scheduler,
            fields: config.fields.clone(),
            profile: config.collection_profile(),
            transmission_interval_secs: AtomicU64::new(interval_secs),
            started: AtomicBool::new(false),
            periodic_flush: Mutex::new(None),
            runtime: Mutex::new(None),
        })
    }

    /// Subscribe to the location provider and begin buffering fixes.
    ///
    /// Idempotent: a second `start` cancels the existing subscription
    /// before resubscribing, so each fix is only ever enqueued once. Must
    /// be called from within a tokio runtime; the runtime is captured for
    /// the flush tasks spawned later.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("collection already started, refreshing subscription");
            self.provider.cancel();
        }

        *lock_slot(&self.runtime) = Some(Handle::current());

        let weak = self.weak.clone();
        let handler: FixHandler = Arc::new(move |fix, context| {
            if let Some(service) = weak.upgrade() {
                service.on_fix(&fix, context);
            }
        });
        self.provider.subscribe(self.profile, handler);
        self.settings.set_started(true);

        info!(
            interval_secs = self.transmission_interval_secs(),
            "collection service started"
        );
    }

    /// Unsubscribe and flush whatever is still buffered, best-effort: the
    /// final batch is posted asynchronously and is not guaranteed delivered
    /// before this returns. The queue itself stays valid; a failure
    /// completion racing past `stop` still requeues correctly.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            warn!("stop requested but collection was never started");
            return;
        }

        self.provider.cancel();
        self.disable_periodic_flush();
        self.settings.set_started(false);

        let handle = lock_slot(&self.runtime).take();
        if let (Some(handle), Some(service)) = (handle, self.weak.upgrade()) {
            handle.spawn(async move {
                let outcome = service.flush().await;
                debug!(?outcome, "final flush after stop");
            });
        }

        info!("collection service stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn transmission_interval_secs(&self) -> u64 {
        self.transmission_interval_secs.load(Ordering::SeqCst)
    }

    /// Change the transmission interval at runtime. Already-buffered
    /// records are not re-evaluated until the next incoming fix or an
    /// explicit flush.
    pub fn set_transmission_interval(&self, interval: Duration) {
        let secs = interval.as_secs();
        self.transmission_interval_secs
            .store(secs, Ordering::SeqCst);
        self.settings.set_transmission_interval_secs(secs);
        debug!(interval_secs = secs, "transmission interval updated");
    }

    /// Drain the queue and attempt one upload. Failed batches are requeued
    /// by the uploader.
    pub async fn flush(&self) -> UploadOutcome {
        let records = self.queue.pop_all();
        self.uploader.post_locations(records).await
    }

    /// The age check: flush only if the oldest buffered record has
    /// outlived the transmission interval.
    pub async fn flush_if_stale(&self) -> Option<UploadOutcome> {
        if self.oldest_is_stale() {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Register a scheduler task that flushes the queue every transmission
    /// interval, independent of incoming fixes. For hosts that background
    /// for long stretches with no location updates. No-op when already
    /// enabled.
    pub fn enable_periodic_flush(&self) {
        let mut slot = lock_slot(&self.periodic_flush);
        if slot.is_some() {
            return;
        }

        let Some(handle) = lock_slot(&self.runtime).clone() else {
            warn!("periodic flush requested before start; ignoring");
            return;
        };

        let weak = self.weak.clone();
        let interval = Duration::from_secs(self.transmission_interval_secs());
        let task = PeriodicTask::new(interval, move || {
            let Some(service) = weak.upgrade() else {
                return;
            };
            handle.spawn(async move {
                let outcome = service.flush().await;
                debug!(?outcome, "periodic flush complete");
            });
        });

        *slot = Some(self.scheduler.schedule(task));
        info!(interval_secs = interval.as_secs(), "periodic flush enabled");
    }

    /// Cancel the periodic flush task, if registered.
    pub fn disable_periodic_flush(&self) {
        if let Some(id) = lock_slot(&self.periodic_flush).take() {
            self.scheduler.cancel(id);
            debug!(task_id = id, "periodic flush disabled");
        }
    }

    fn on_fix(&self, fix: &Fix, context: LocationContext) {
        if !self.started.load(Ordering::SeqCst) {
            // A provider may deliver one last fix while cancel is racing.
            return;
        }

        let record = LocationRecord::from_fix(
            fix,
            self.advertising.advertising_info(),
            self.network.current_network(),
            &self.fields,
            context,
        );

        if let Err(e) = self.queue.add(&record) {
            error!(error = %e, "could not buffer location record");
        }

        if self.oldest_is_stale() {
            debug!("oldest buffered record exceeded transmission interval, flushing");
            let handle = lock_slot(&self.runtime).clone();
            if let (Some(handle), Some(service)) = (handle, self.weak.upgrade()) {
                handle.spawn(async move {
                    let outcome = service.flush().await;
                    debug!(?outcome, "age-triggered flush complete");
                });
            }
        }
    }

    fn oldest_is_stale(&self) -> bool {
        let Some((_, oldest)) = self.queue.first() else {
            return false;
        };
        let age = chrono::Utc::now()
            .timestamp()
            .saturating_sub(oldest.utc_timestamp);
        age >= 0 && age as u64 >= self.transmission_interval_secs()
    }
}

fn lock_slot<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AuthorizationStatus, StaticAdvertising};
    use crate::queue::MemoryQueue;
    use crate::settings::MemorySettings;
    use crate::uploader::{BackgroundLease, NoopLease, Postable, UploadError};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::AtomicUsize;

    struct FakeProvider {
        handler: Mutex<Option<FixHandler>>,
        subscriptions: AtomicUsize,
        cancels: AtomicUsize,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                handler: Mutex::new(None),
                subscriptions: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            }
        }

        fn emit(&self, fix: Fix, context: LocationContext) {
            let handler = lock_slot(&self.handler).clone();
            if let Some(handler) = handler {
                handler(fix, context);
            }
        }
    }

    impl LocationProvider for FakeProvider {
        fn subscribe(&self, _profile: CollectionProfile, handler: FixHandler) {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            *lock_slot(&self.handler) = Some(handler);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            *lock_slot(&self.handler) = None;
        }

        fn services_enabled(&self) -> bool {
            true
        }

        fn authorization(&self) -> AuthorizationStatus {
            AuthorizationStatus::Authorized
        }
    }

    struct AlwaysOkPoster {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Postable for AlwaysOkPoster {
        async fn post_json(&self, _body: &serde_json::Value) -> Result<(), UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fix_at(timestamp: chrono::DateTime<Utc>) -> Fix {
        Fix {
            latitude: 48.85,
            longitude: 2.35,
            horizontal_accuracy: 5.0,
            vertical_accuracy: 4.0,
            altitude: 35.0,
            course: Some(90.0),
            speed: Some(1.5),
            timestamp,
        }
    }

    fn service_with(
        provider: Arc<FakeProvider>,
        poster: Arc<AlwaysOkPoster>,
    ) -> (Arc<CollectionService>, Arc<MemoryQueue<LocationRecord>>) {
        let mut config = Configuration::new(
            "https://ingest.example.com/v1/locations",
            vec![("x-api-key".into(), "k".into())],
        );
        config.transmission_interval_secs = 60;

        let queue: Arc<MemoryQueue<LocationRecord>> = Arc::new(MemoryQueue::new());
        let uploader = Arc::new(LocationUploader::new(
            poster as Arc<dyn Postable>,
            Arc::clone(&queue) as Arc<dyn RecordQueue<LocationRecord>>,
            Arc::new(NoopLease) as Arc<dyn BackgroundLease>,
        ));

        let service = CollectionService::new(
            &config,
            Arc::clone(&queue) as Arc<dyn RecordQueue<LocationRecord>>,
            uploader,
            provider as Arc<dyn LocationProvider>,
            Arc::new(StaticAdvertising::new("service-test", false)),
            Arc::new(NoNetworkInfo),
            Arc::new(MemorySettings::new()),
            TaskScheduler::new(Duration::from_secs(60)),
        );
        (service, queue)
    }

    #[tokio::test]
    async fn incoming_fixes_are_buffered() {
        let provider = Arc::new(FakeProvider::new());
        let poster = Arc::new(AlwaysOkPoster {
            calls: AtomicUsize::new(0),
        });
        let (service, queue) = service_with(Arc::clone(&provider), poster);

        service.start();
        provider.emit(fix_at(Utc::now()), LocationContext::Regular);
        provider.emit(fix_at(Utc::now()), LocationContext::Regular);

        assert_eq!(queue.count(), 2);
        assert!(service.is_started());
    }

    #[tokio::test]
    async fn double_start_resubscribes_instead_of_stacking() {
        let provider = Arc::new(FakeProvider::new());
        let poster = Arc::new(AlwaysOkPoster {
            calls: AtomicUsize::new(0),
        });
        let (service, queue) = service_with(Arc::clone(&provider), poster);

        service.start();
        service.start();

        assert_eq!(provider.subscriptions.load(Ordering::SeqCst), 2);
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 1);

        // Still exactly one live handler: one fix, one record.
        provider.emit(fix_at(Utc::now()), LocationContext::Regular);
        assert_eq!(queue.count(), 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let provider = Arc::new(FakeProvider::new());
        let poster = Arc::new(AlwaysOkPoster {
            calls: AtomicUsize::new(0),
        });
        let (service, _queue) = service_with(Arc::clone(&provider), poster);

        service.stop();

        assert!(!service.is_started());
        assert_eq!(provider.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fresh_records_are_not_flushed() {
        let provider = Arc::new(FakeProvider::new());
        let poster = Arc::new(AlwaysOkPoster {
            calls: AtomicUsize::new(0),
        });
        let (service, queue) = service_with(Arc::clone(&provider), poster);

        service.start();
        provider.emit(fix_at(Utc::now()), LocationContext::Regular);

        assert_eq!(service.flush_if_stale().await, None);
        assert_eq!(queue.count(), 1);
    }

    #[tokio::test]
    async fn stale_oldest_record_triggers_flush() {
        let provider = Arc::new(FakeProvider::new());
        let poster = Arc::new(AlwaysOkPoster {
            calls: AtomicUsize::new(0),
        });
        let (service, queue) = service_with(Arc::clone(&provider), Arc::clone(&poster));

        service.start();
        provider.emit(
            fix_at(Utc::now() - ChronoDuration::seconds(120)),
            LocationContext::Regular,
        );
        provider.emit(fix_at(Utc::now()), LocationContext::Regular);

        let outcome = service.flush_if_stale().await;
        assert_eq!(outcome, Some(UploadOutcome::Delivered(2)));
        assert_eq!(poster.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn runtime_interval_change_is_persisted() {
        let provider = Arc::new(FakeProvider::new());
        let poster = Arc::new(AlwaysOkPoster {
            calls: AtomicUsize::new(0),
        });
        let (service, _queue) = service_with(provider, poster);

        service.set_transmission_interval(Duration::from_secs(3600));
        assert_eq!(service.transmission_interval_secs(), 3600);
    }
}
