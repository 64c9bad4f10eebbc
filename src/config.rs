//! Collector configuration: endpoint, auth headers, intervals, and
//! field-collection toggles.
//!
//! Built programmatically by the host or loaded from a TOML file. A
//! configuration is immutable once handed to the collection service; only
//! the transmission interval is mutable afterwards, through the service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TrackerError;
use crate::provider::CollectionProfile;

// ============================================================================
// Defaults
// ============================================================================

/// Maximum tolerated age of the oldest buffered record before a flush is
/// forced (seconds). 28 800 = 8 hours.
pub const DEFAULT_TRANSMISSION_INTERVAL_SECS: u64 = 28_800;

/// Desired spacing between location fixes requested from the provider
/// (seconds).
pub const DEFAULT_COLLECTION_INTERVAL_SECS: u64 = 60;

/// Desired horizontal accuracy requested from the provider (meters).
pub const DEFAULT_COLLECTION_ACCURACY_M: f64 = 10.0;

/// Bounded timeout for the upload POST (seconds). A timed-out request is
/// treated like any other network failure.
pub const UPLOAD_TIMEOUT_SECS: u64 = 45;

fn default_true() -> bool {
    true
}

fn default_transmission_interval_secs() -> u64 {
    DEFAULT_TRANSMISSION_INTERVAL_SECS
}

fn default_collection_interval_secs() -> u64 {
    DEFAULT_COLLECTION_INTERVAL_SECS
}

fn default_collection_accuracy_m() -> f64 {
    DEFAULT_COLLECTION_ACCURACY_M
}

// ============================================================================
// Configuration
// ============================================================================

/// Per-field collection toggles. A disabled field is blanked at record
/// conversion time and serializes as `null` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectingFields {
    #[serde(default = "default_true")]
    pub log_network_info: bool,

    #[serde(default = "default_true")]
    pub log_device_course: bool,

    #[serde(default = "default_true")]
    pub log_device_speed: bool,
}

impl Default for CollectingFields {
    fn default() -> Self {
        Self {
            log_network_info: true,
            log_device_course: true,
            log_device_speed: true,
        }
    }
}

/// Collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Ingest endpoint URL.
    pub url: String,

    /// Auth headers sent with every upload. Must be non-empty.
    #[serde(default)]
    pub headers: Vec<(String, String)>,

    #[serde(default = "default_transmission_interval_secs")]
    pub transmission_interval_secs: u64,

    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,

    #[serde(default = "default_collection_accuracy_m")]
    pub collection_accuracy_m: f64,

    #[serde(default)]
    pub fields: CollectingFields,
}

impl Configuration {
    /// Configuration with the given endpoint and headers, everything else
    /// at defaults.
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            url: url.into(),
            headers,
            transmission_interval_secs: DEFAULT_TRANSMISSION_INTERVAL_SECS,
            collection_interval_secs: DEFAULT_COLLECTION_INTERVAL_SECS,
            collection_accuracy_m: DEFAULT_COLLECTION_ACCURACY_M,
            fields: CollectingFields::default(),
        }
    }

    /// Load and validate a configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrackerError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::InvalidConfiguration(e.to_string()))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| TrackerError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values. Tracking must not start on an invalid
    /// configuration.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.url.is_empty() {
            return Err(TrackerError::InvalidConfiguration(
                "endpoint url cannot be empty".to_string(),
            ));
        }

        if self.headers.is_empty() {
            return Err(TrackerError::InvalidConfiguration(
                "auth headers cannot be empty".to_string(),
            ));
        }

        if self
            .headers
            .iter()
            .any(|(name, value)| name.is_empty() || value.is_empty())
        {
            return Err(TrackerError::InvalidConfiguration(
                "auth headers cannot contain empty names or values".to_string(),
            ));
        }

        if self.transmission_interval_secs == 0 {
            return Err(TrackerError::InvalidConfiguration(
                "transmission_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.collection_interval_secs == 0 {
            return Err(TrackerError::InvalidConfiguration(
                "collection_interval_secs must be greater than 0".to_string(),
            ));
        }

        if !self.collection_accuracy_m.is_finite() || self.collection_accuracy_m <= 0.0 {
            return Err(TrackerError::InvalidConfiguration(
                "collection_accuracy_m must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn transmission_interval(&self) -> Duration {
        Duration::from_secs(self.transmission_interval_secs)
    }

    /// The profile handed to the location provider on subscribe.
    pub fn collection_profile(&self) -> CollectionProfile {
        CollectionProfile {
            interval: Duration::from_secs(self.collection_interval_secs),
            accuracy_m: self.collection_accuracy_m,
        }
    }
}
