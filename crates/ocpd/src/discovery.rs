//! Capability discovery - finds which attribute groups a card exposes.
//!
//! Probes existence (never values) of each optional group's marker leaf, or
//! of each numbered instance directory. Always-available groups are assumed
//! present without probing.
//!
//! # Async Safety
//!
//! Every probe goes through the [`BoundedReader`], so a stuck attribute
//! costs at most one read ceiling and is then quarantined.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Probe failures are recorded as diagnostics, never fatal

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ocp_core::{
    AttributeGroup, Catalog, CapabilitySet, DeviceRoot, GroupAvailability, GroupId,
    ProbeDiagnostic, ProbeOutcome,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::reader::{list_blocking, run_bounded, BoundedReader, Quarantine, Unfinished};

// ============================================================================
// Constants
// ============================================================================

/// Prefix of device directories under the timecard class.
pub const DEVICE_PREFIX: &str = "ocp";

/// Leaves every genuine device exposes.
pub const ESSENTIAL_LEAVES: [&str; 2] = ["serialnum", "available_clock_sources"];

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while locating devices.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The class directory could not be listed
    #[error("failed to read {path}: {message}")]
    ClassDirUnreadable { path: PathBuf, message: String },

    /// No usable device under the class directory
    #[error("no timing card found under {0}")]
    NoDevice(PathBuf),
}

// ============================================================================
// Device Location
// ============================================================================

/// Lists device roots under `class_dir` that look like real timing cards.
///
/// Entries must be named `ocp*` and expose every essential leaf. Results are
/// sorted by name.
///
/// # Errors
///
/// Returns `DiscoveryError::ClassDirUnreadable` if the directory cannot be
/// listed within `ceiling`. An empty result is not an error.
pub async fn locate_devices(
    class_dir: &Path,
    ceiling: Duration,
) -> Result<Vec<DeviceRoot>, DiscoveryError> {
    let unreadable = |message: String| DiscoveryError::ClassDirUnreadable {
        path: class_dir.to_path_buf(),
        message,
    };
    let entries = match run_bounded(&Quarantine::default(), ceiling, class_dir, list_blocking).await
    {
        Ok(Ok(entries)) => entries,
        Ok(Err(e)) => return Err(unreadable(e.to_string())),
        Err(Unfinished::TimedOut) => {
            return Err(unreadable(format!(
                "listing timed out after {} ms",
                ceiling.as_millis()
            )))
        }
        Err(Unfinished::Spawn(e)) => return Err(unreadable(e.to_string())),
    };

    // Sorted by name already.
    let candidates: Vec<PathBuf> = entries
        .into_iter()
        .filter(|entry| entry.name.starts_with(DEVICE_PREFIX))
        .map(|entry| entry.path)
        .collect();

    let mut devices = Vec::new();
    for path in candidates {
        let root = DeviceRoot::new(path);
        let reader = BoundedReader::new(root.clone(), Arc::new(Catalog::ptp_ocp()), ceiling);

        let mut complete = true;
        for leaf in ESSENTIAL_LEAVES {
            if !matches!(reader.probe_leaf(leaf).await, Ok(ProbeOutcome::Present)) {
                debug!(device = %root, leaf, "Skipping entry without essential leaf");
                complete = false;
                break;
            }
        }
        if complete {
            devices.push(root);
        }
    }

    Ok(devices)
}

/// Returns the first device under `class_dir`.
pub async fn locate_first_device(
    class_dir: &Path,
    ceiling: Duration,
) -> Result<DeviceRoot, DiscoveryError> {
    locate_devices(class_dir, ceiling)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DiscoveryError::NoDevice(class_dir.to_path_buf()))
}

// ============================================================================
// Capability Discoverer
// ============================================================================

/// Probes a device for its optional attribute groups.
#[derive(Debug, Clone)]
pub struct CapabilityDiscoverer {
    reader: BoundedReader,
}

impl CapabilityDiscoverer {
    pub fn new(reader: BoundedReader) -> Self {
        Self { reader }
    }

    /// Runs a full discovery pass.
    ///
    /// Idempotent: two passes over an unchanged device yield equal sets.
    /// A failed probe marks only its own group (or instance) unavailable.
    pub async fn discover(&self) -> CapabilitySet {
        let catalog = self.reader.catalog();
        let mut groups = BTreeMap::new();
        let mut diagnostics = Vec::new();

        for group in catalog.groups() {
            let availability = if group.is_probed() {
                self.probe_group(group, &mut diagnostics).await
            } else {
                assumed(group)
            };
            groups.insert(group.id, availability);
        }

        let set = CapabilitySet::new(groups, diagnostics);
        info!(
            device = %self.reader.root(),
            available = ?set.available_groups(),
            failed_probes = set.diagnostics().len(),
            "Capability discovery complete"
        );
        set
    }

    async fn probe_group(
        &self,
        group: &AttributeGroup,
        diagnostics: &mut Vec<ProbeDiagnostic>,
    ) -> GroupAvailability {
        let ordinals: Vec<Option<u8>> = match &group.ordinals {
            Some(range) => range.clone().map(Some).collect(),
            None => vec![None],
        };

        let mut present = BTreeSet::new();
        let mut any = false;

        for ordinal in ordinals {
            let Some(leaf) = group.probe_leaf(ordinal) else {
                continue;
            };

            let outcome = match self.reader.probe_leaf(&leaf).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(group = %group.id, leaf = %leaf, error = %e, "Invalid probe location");
                    continue;
                }
            };

            match outcome {
                ProbeOutcome::Present => {
                    any = true;
                    if let Some(n) = ordinal {
                        present.insert(n);
                    }
                }
                ProbeOutcome::Absent => {
                    debug!(group = %group.id, leaf = %leaf, "Capability absent");
                }
                failure => {
                    warn!(
                        group = %group.id,
                        leaf = %leaf,
                        outcome = ?failure,
                        "Capability probe failed, treating as unavailable"
                    );
                    diagnostics.push(ProbeDiagnostic {
                        group: group.id,
                        ordinal,
                        location: leaf,
                        outcome: failure,
                    });
                }
            }
        }

        if group.ordinals.is_some() {
            GroupAvailability::from_instances(present)
        } else if any {
            GroupAvailability::present()
        } else {
            GroupAvailability::absent()
        }
    }
}

/// Availability of a group that is never probed.
fn assumed(group: &AttributeGroup) -> GroupAvailability {
    match &group.ordinals {
        Some(_) => GroupAvailability {
            available: true,
            instances: group.instances().into_iter().collect(),
        },
        None => GroupAvailability::present(),
    }
}

// ============================================================================
// Capability Cache
// ============================================================================

/// Shared, atomically replaceable capability view.
///
/// Readers clone the current `Arc` once and keep using it for a whole cycle;
/// a refresh swaps in a new set without disturbing them.
#[derive(Debug)]
pub struct CapabilityCache {
    discoverer: CapabilityDiscoverer,
    current: RwLock<Option<Arc<CapabilitySet>>>,
    refresh_lock: Mutex<()>,
}

impl CapabilityCache {
    pub fn new(discoverer: CapabilityDiscoverer) -> Self {
        Self {
            discoverer,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The cached set, if discovery has run.
    pub fn current(&self) -> Option<Arc<CapabilitySet>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns the cached set, discovering on first use.
    pub async fn get(&self) -> Arc<CapabilitySet> {
        if let Some(set) = self.current() {
            return set;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have finished discovery while we waited.
        if let Some(set) = self.current() {
            return set;
        }
        self.run_discovery().await
    }

    /// Re-runs discovery and replaces the cached set.
    pub async fn refresh(&self) -> Arc<CapabilitySet> {
        let _guard = self.refresh_lock.lock().await;
        self.run_discovery().await
    }

    async fn run_discovery(&self) -> Arc<CapabilitySet> {
        let set = Arc::new(self.discoverer.discover().await);
        let mut slot = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::clone(&set));
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn discoverer(dir: &TempDir) -> CapabilityDiscoverer {
        CapabilityDiscoverer::new(BoundedReader::new(
            DeviceRoot::new(dir.path()),
            Arc::new(Catalog::ptp_ocp()),
            Duration::from_millis(500),
        ))
    }

    #[tokio::test]
    async fn test_minimal_device() {
        let dir = TempDir::new().unwrap();
        let set = discoverer(&dir).discover().await;

        assert!(set.is_available(GroupId::Basic));
        assert!(set.is_available(GroupId::Sma));
        assert!(!set.is_available(GroupId::Tod));
        assert!(!set.is_available(GroupId::Generator));
        assert_eq!(set.instances(GroupId::Sma).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(set.diagnostics().is_empty());
    }

    #[tokio::test]
    async fn test_probes_instances() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("irig_b_mode"), "3").unwrap();
        fs::create_dir(dir.path().join("gen1")).unwrap();
        fs::create_dir(dir.path().join("gen3")).unwrap();
        fs::create_dir(dir.path().join("freq2")).unwrap();

        let set = discoverer(&dir).discover().await;
        assert!(set.is_available(GroupId::Irig));
        assert_eq!(
            set.instances(GroupId::Generator).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(
            set.instances(GroupId::FrequencyCounter).collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[tokio::test]
    async fn test_failed_group_check_is_recorded_and_isolated() {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let wedged = dir.path().join("tod_protocol");
        let c_path = CString::new(wedged.as_os_str().as_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) }, 0);
        fs::write(dir.path().join("irig_b_mode"), "3").unwrap();
        fs::create_dir(dir.path().join("gen1")).unwrap();

        let reader = BoundedReader::new(
            DeviceRoot::new(dir.path()),
            Arc::new(Catalog::ptp_ocp()),
            Duration::from_millis(100),
        );
        // A read that wedges leaves the leaf quarantined, so its probe fails.
        let stuck = reader.read_str("tod.protocol").await.unwrap();
        assert_eq!(stuck.outcome, ocp_core::ReadOutcome::TimedOut);

        let set = CapabilityDiscoverer::new(reader).discover().await;
        assert!(!set.is_available(GroupId::Tod));
        assert_eq!(set.diagnostics().len(), 1);
        let diagnostic = &set.diagnostics()[0];
        assert_eq!(diagnostic.group, GroupId::Tod);
        assert_eq!(diagnostic.location, "tod_protocol");
        assert_eq!(diagnostic.outcome, ProbeOutcome::TimedOut);

        // Every other group was still probed.
        assert!(set.is_available(GroupId::Irig));
        assert_eq!(set.instances(GroupId::Generator).collect::<Vec<_>>(), vec![1]);
        assert!(set.is_available(GroupId::Sma));
    }

    #[tokio::test]
    async fn test_cache_refresh_replaces_set() {
        let dir = TempDir::new().unwrap();
        let cache = CapabilityCache::new(discoverer(&dir));
        assert!(cache.current().is_none());

        let first = cache.get().await;
        assert!(!first.is_available(GroupId::Tod));

        fs::write(dir.path().join("tod_protocol"), "UBX").unwrap();
        // Cached until an explicit refresh.
        assert!(!cache.get().await.is_available(GroupId::Tod));

        let refreshed = cache.refresh().await;
        assert!(refreshed.is_available(GroupId::Tod));
        assert!(!first.is_available(GroupId::Tod));
    }

    #[tokio::test]
    async fn test_locate_devices_filters_entries() {
        let dir = TempDir::new().unwrap();
        for name in ["ocp1", "ocp0"] {
            let device = dir.path().join(name);
            fs::create_dir(&device).unwrap();
            fs::write(device.join("serialnum"), "SN").unwrap();
            fs::write(device.join("available_clock_sources"), "NONE PPS").unwrap();
        }
        // Missing essential leaves.
        fs::create_dir(dir.path().join("ocp2")).unwrap();
        // Wrong prefix.
        fs::create_dir(dir.path().join("other0")).unwrap();

        let devices = locate_devices(dir.path(), Duration::from_millis(500))
            .await
            .unwrap();
        let names: Vec<_> = devices.iter().filter_map(|d| d.name()).collect();
        assert_eq!(names, vec!["ocp0", "ocp1"]);
    }

    #[tokio::test]
    async fn test_locate_devices_unlistable_class_dir() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("timecard");
        fs::write(&not_a_dir, "").unwrap();

        for class_dir in [not_a_dir, dir.path().join("missing")] {
            let err = locate_devices(&class_dir, Duration::from_millis(500))
                .await
                .unwrap_err();
            assert!(matches!(err, DiscoveryError::ClassDirUnreadable { .. }));
        }
    }

    #[tokio::test]
    async fn test_locate_first_device_empty() {
        let dir = TempDir::new().unwrap();
        let err = locate_first_device(dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::NoDevice(_)));
    }
}
