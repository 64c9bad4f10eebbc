//! geotrace: background location telemetry collection
//!
//! Buffers location fixes in a durable on-disk queue and ships them to an
//! ingest endpoint in batches, tolerating process restarts, network
//! failures, and hosts with background-execution limits.
//!
//! ## Architecture
//!
//! - **Tracker**: Public facade; owns storage, validates preconditions,
//!   wires the pipeline
//! - **Collection Service**: Subscribes to the location provider, buffers
//!   fixes, decides when to flush
//! - **Queue**: Durable sled-backed record queue with an in-memory fallback
//! - **Uploader**: Drain-then-POST batch delivery with requeue-on-failure
//! - **Scheduler**: Shared periodic task timer for fix-independent flushing

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod provider;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod tracker;
pub mod types;
pub mod uploader;

// Re-export configuration
pub use config::{CollectingFields, Configuration};

// Re-export commonly used types
pub use types::{AdvertisingInfo, Fix, LocationContext, LocationRecord, NetworkInfo};

// Re-export the tracking entry points
pub use error::TrackerError;
pub use tracker::LocationTracker;

// Re-export platform seams
pub use provider::{
    AdvertisingProvider, AuthorizationStatus, CollectionProfile, FixHandler, LocationProvider,
    StaticAdvertising,
};
pub use service::{CollectionService, NetworkInfoProvider, NoNetworkInfo};
pub use uploader::{BackgroundLease, HttpPoster, NoopLease, Postable, UploadOutcome};

// Re-export storage components
pub use queue::{DurableQueue, MemoryQueue, RecordQueue, StorageError};

// Re-export diagnostics
pub use diagnostics::{DiagnosticsLog, LogEntry, LogLevel};

// Re-export scheduling
pub use scheduler::{PeriodicTask, TaskId, TaskScheduler};
