//! Typed failures returned when tracking cannot start.
//!
//! Only start-time problems surface here. Steady-state storage and network
//! errors are absorbed internally (logged, sentinel values, requeue) and
//! never terminate the collection loop; see `queue::StorageError` and
//! `uploader::UploadError` for those.

use thiserror::Error;

/// Reasons `start_tracking` can refuse to start.
///
/// Authorization problems are distinct from configuration problems so the
/// host can render a specific remediation message for each.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Missing or invalid configuration (empty auth headers, bad URL).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The platform adapter reports no location usage description, so the
    /// OS would never show the permission prompt.
    #[error("platform location usage description is missing")]
    MissingUsageDescription,

    /// Location services are switched off system-wide.
    #[error("location services are disabled in system settings")]
    LocationDisabled,

    /// The user denied (or policy restricted) location access.
    #[error("location access is denied or restricted for this application")]
    Unauthorized,

    /// `start_tracking` was called while a session is already active.
    #[error("location tracking is already active; stop the previous session before starting")]
    AlreadyTracking,
}
