//! Capability traits for the platform collaborators the core depends on.
//!
//! The platform location stack (CoreLocation, FusedLocationProvider, a GPS
//! daemon) is modelled as a single-method subscription interface rather than
//! a delegate protocol; the adapter implementing it lives in the host, not
//! here. The same goes for the advertising-identifier source.

use std::sync::Arc;
use std::time::Duration;

use crate::types::{AdvertisingInfo, Fix, LocationContext};

/// What the provider is asked for when subscribing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectionProfile {
    /// Desired spacing between fixes.
    pub interval: Duration,
    /// Desired horizontal accuracy in meters.
    pub accuracy_m: f64,
}

/// Callback invoked for every incoming fix, on the provider's own thread.
pub type FixHandler = Arc<dyn Fn(Fix, LocationContext) + Send + Sync>;

/// Platform location source.
///
/// `subscribe` replaces any previous subscription; `cancel` must drop the
/// stored handler so the collection service (captured inside it) can be
/// released.
pub trait LocationProvider: Send + Sync {
    fn subscribe(&self, profile: CollectionProfile, handler: FixHandler);
    fn cancel(&self);

    /// Whether location services are enabled system-wide.
    fn services_enabled(&self) -> bool;

    fn authorization(&self) -> AuthorizationStatus;

    /// Whether the host app declares the usage description the OS requires
    /// before it will show the permission prompt.
    fn usage_description_present(&self) -> bool {
        true
    }
}

/// Platform location permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

impl AuthorizationStatus {
    /// Denied and restricted both block tracking from starting.
    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

/// Source of the device advertising identifier.
pub trait AdvertisingProvider: Send + Sync {
    fn advertising_info(&self) -> AdvertisingInfo;
}

/// Fixed advertising info, for hosts that resolve the identifier once at
/// startup (and for tests).
pub struct StaticAdvertising {
    info: AdvertisingInfo,
}

impl StaticAdvertising {
    pub fn new(advertising_id: impl Into<String>, limit_ad_tracking: bool) -> Self {
        Self {
            info: AdvertisingInfo::new(advertising_id, limit_ad_tracking),
        }
    }
}

impl AdvertisingProvider for StaticAdvertising {
    fn advertising_info(&self) -> AdvertisingInfo {
        self.info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_and_restricted_block_tracking() {
        assert!(AuthorizationStatus::Denied.is_denied());
        assert!(AuthorizationStatus::Restricted.is_denied());
        assert!(!AuthorizationStatus::Authorized.is_denied());
        assert!(!AuthorizationStatus::NotDetermined.is_denied());
    }
}
