//! Health checks derived from the raw sections of a snapshot.
//!
//! Health is computed once per snapshot and stored with it, so a change in
//! any check shows up in the snapshot diff like any other field.

use serde::{Deserialize, Serialize};

use crate::snapshot::{BasicStatus, ClockStatus};
use crate::sync::{GnssSync, SyncState};

/// Default bound on clock drift magnitude considered acceptable.
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 1000.0;

/// Clock source value meaning no reference is selected.
const NO_CLOCK_SOURCE: &str = "NONE";

/// Thresholds applied when deriving [`HealthStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Drift magnitudes strictly below this pass.
    pub drift_threshold: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
        }
    }
}

impl HealthPolicy {
    /// Runs every check against a snapshot read from a reachable device.
    #[must_use]
    pub fn evaluate(
        &self,
        basic: &BasicStatus,
        clock: &ClockStatus,
        gnss: &GnssSync,
    ) -> HealthStatus {
        let clock_source_set = basic.clock_source.as_deref().is_some_and(|source| {
            !source.is_empty() && !source.eq_ignore_ascii_case(NO_CLOCK_SOURCE)
        });

        HealthStatus {
            device_accessible: true,
            serial_readable: basic.serial_number.is_some(),
            gnss_synchronized: gnss.state == SyncState::Synchronized,
            clock_source_set,
            // NaN compares false, so it fails the check.
            drift_acceptable: clock.drift.map(|drift| drift.abs() < self.drift_threshold),
        }
    }
}

/// Outcome of the health checks for one snapshot.
///
/// The default value describes an unreachable device: every check fails and
/// drift is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub device_accessible: bool,
    pub serial_readable: bool,
    pub gnss_synchronized: bool,
    /// A reference other than `NONE` is selected.
    pub clock_source_set: bool,
    /// `None` when drift could not be read or parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_acceptable: Option<bool>,
}

impl HealthStatus {
    /// Every check passes. Unknown drift does not count against the device.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.device_accessible
            && self.serial_readable
            && self.gnss_synchronized
            && self.clock_source_set
            && self.drift_acceptable != Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(serial: Option<&str>, source: Option<&str>) -> BasicStatus {
        BasicStatus {
            serial_number: serial.map(str::to_string),
            clock_source: source.map(str::to_string),
            ..Default::default()
        }
    }

    fn drift(value: Option<f64>) -> ClockStatus {
        ClockStatus {
            drift: value,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_device() {
        let health = HealthPolicy::default().evaluate(
            &basic(Some("SN1"), Some("GNSS")),
            &drift(Some(-12.5)),
            &GnssSync::from_raw(Some("SYNC".to_string())),
        );
        assert!(health.is_healthy());
        assert_eq!(health.drift_acceptable, Some(true));
    }

    #[test]
    fn test_clock_source_none_is_unset() {
        let gnss = GnssSync::from_raw(Some("SYNC".to_string()));
        for source in [Some("NONE"), Some("none"), Some(""), None] {
            let health =
                HealthPolicy::default().evaluate(&basic(Some("SN1"), source), &drift(None), &gnss);
            assert!(!health.clock_source_set, "{source:?}");
            assert!(!health.is_healthy());
        }
    }

    #[test]
    fn test_gnss_check_uses_classifier() {
        let policy = HealthPolicy::default();
        let b = basic(Some("SN1"), Some("GNSS"));
        for (raw, synced) in [("SYNC", true), ("LOST @ 2024-01-01", false), ("1", false)] {
            let gnss = GnssSync::from_raw(Some(raw.to_string()));
            let health = policy.evaluate(&b, &drift(None), &gnss);
            assert_eq!(health.gnss_synchronized, synced, "{raw}");
        }
    }

    #[test]
    fn test_drift_threshold() {
        let strict = HealthPolicy {
            drift_threshold: 10.0,
        };
        let b = basic(Some("SN1"), Some("GNSS"));
        let gnss = GnssSync::from_raw(Some("SYNC".to_string()));

        let verdict = |value: f64| strict.evaluate(&b, &drift(Some(value)), &gnss).drift_acceptable;
        assert_eq!(verdict(9.9), Some(true));
        assert_eq!(verdict(-10.0), Some(false));
        assert_eq!(verdict(f64::NAN), Some(false));

        // Unknown drift leaves the verdict to the other checks.
        let unknown = strict.evaluate(&b, &drift(None), &gnss);
        assert_eq!(unknown.drift_acceptable, None);
        assert!(unknown.is_healthy());
    }

    #[test]
    fn test_default_is_unreachable() {
        let health = HealthStatus::default();
        assert!(!health.device_accessible);
        assert!(!health.is_healthy());
    }
}
