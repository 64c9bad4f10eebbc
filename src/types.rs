//! Core value types: fixes, location records, and the storage codec.
//!
//! A `Fix` is one raw sample from the platform location provider. The
//! collection service enriches it into an immutable `LocationRecord`, which
//! carries two independent encodings:
//!
//! - **storage**: a schema-versioned blob (leading version byte + tagged
//!   serde body) written to the durable queue;
//! - **wire**: the JSON object posted to the ingest endpoint, using the
//!   fixed key set expected by the server.
//!
//! The two encodings round-trip independently; changing one must not break
//! the other.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CollectingFields;

/// Identifier type reported alongside the advertising id.
pub const AD_ID_TYPE: &str = "idfa";

/// Version byte prefixed to every stored blob.
///
/// Bump when the storage body changes shape; `decode_versioned` rejects
/// blobs written by a newer schema instead of misreading them.
pub const STORAGE_SCHEMA_VERSION: u8 = 1;

/// How a fix was obtained from the platform provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationContext {
    Unknown,
    Passive,
    Regular,
    VisitEntry,
    VisitExit,
}

impl LocationContext {
    /// Wire representation (`location_context` value).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Passive => "passive",
            Self::Regular => "regular",
            Self::VisitEntry => "visit_entry",
            Self::VisitExit => "visit_exit",
        }
    }
}

/// Device advertising identifier plus the user's opt-out flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingInfo {
    pub advertising_id: String,
    /// True when the user has limited ad tracking (`ad_opt_out` on the wire).
    pub limit_ad_tracking: bool,
}

impl AdvertisingInfo {
    pub fn new(advertising_id: impl Into<String>, limit_ad_tracking: bool) -> Self {
        Self {
            advertising_id: advertising_id.into(),
            limit_ad_tracking,
        }
    }
}

/// Wi-Fi fingerprint of the network the device is attached to, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub bssid: Option<String>,
    pub ssid: Option<String>,
}

/// One raw location sample from the platform provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub altitude: f64,
    /// Heading in degrees; `None` when the provider reports no course.
    pub course: Option<f64>,
    /// Ground speed in m/s; `None` when the provider reports no speed.
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// The enriched, storable form of a fix. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub latitude: f64,
    pub longitude: f64,
    /// Seconds since the Unix epoch, UTC.
    pub utc_timestamp: i64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub altitude: f64,
    pub course: Option<f64>,
    pub speed: Option<f64>,
    pub advertising: AdvertisingInfo,
    #[serde(default)]
    pub network: NetworkInfo,
    pub context: LocationContext,
}

impl LocationRecord {
    /// Build a record from a raw fix, applying the field-collection toggles.
    ///
    /// A disabled toggle blanks the corresponding field here, at conversion
    /// time, so neither the stored blob nor the wire payload ever carries
    /// data the host asked not to collect.
    pub fn from_fix(
        fix: &Fix,
        advertising: AdvertisingInfo,
        network: Option<NetworkInfo>,
        fields: &CollectingFields,
        context: LocationContext,
    ) -> Self {
        let network = if fields.log_network_info {
            network.unwrap_or_default()
        } else {
            NetworkInfo::default()
        };

        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            utc_timestamp: fix.timestamp.timestamp(),
            horizontal_accuracy: fix.horizontal_accuracy,
            vertical_accuracy: fix.vertical_accuracy,
            altitude: fix.altitude,
            course: fix.course.filter(|_| fields.log_device_course),
            speed: fix.speed.filter(|_| fields.log_device_speed),
            advertising,
            network,
            context,
        }
    }

    /// The JSON object uploaded to the ingest endpoint.
    ///
    /// Absent optional fields serialize as `null`, which the server treats
    /// the same as an omitted key.
    pub fn wire_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ad_id": self.advertising.advertising_id.to_lowercase(),
            "ad_opt_out": self.advertising.limit_ad_tracking,
            "id_type": AD_ID_TYPE,
            "latitude": self.latitude,
            "longitude": self.longitude,
            "utc_timestamp": self.utc_timestamp,
            "horizontal_accuracy": self.horizontal_accuracy,
            "vertical_accuracy": self.vertical_accuracy,
            "altitude": self.altitude,
            "wifi_bssid": self.network.bssid,
            "wifi_ssid": self.network.ssid,
            "course": self.course,
            "speed": self.speed,
            "location_context": self.context.as_str(),
        })
    }
}

/// Storage codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty storage blob")]
    Empty,
    #[error("unsupported storage schema version {0}")]
    UnsupportedVersion(u8),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Encode a value as a version-prefixed storage blob.
pub(crate) fn encode_versioned<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(128);
    buf.push(STORAGE_SCHEMA_VERSION);
    serde_json::to_writer(&mut buf, value)?;
    Ok(buf)
}

/// Decode a version-prefixed storage blob.
pub(crate) fn decode_versioned<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    match bytes.split_first() {
        None => Err(CodecError::Empty),
        Some((&STORAGE_SCHEMA_VERSION, body)) => Ok(serde_json::from_slice(body)?),
        Some((&version, _)) => Err(CodecError::UnsupportedVersion(version)),
    }
}

impl crate::queue::QueueRecord for LocationRecord {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_versioned(self)
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_versioned(bytes)
    }
}
