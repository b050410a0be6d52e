//! Capability sets: which attribute groups a device instance actually has.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, GroupId};
use crate::read::ProbeOutcome;

/// Availability of one group on a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAvailability {
    pub available: bool,
    /// Ordinals confirmed present. Empty for groups without ordinals.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub instances: BTreeSet<u8>,
}

impl GroupAvailability {
    /// Available group without ordinal instances.
    #[must_use]
    pub fn present() -> Self {
        Self {
            available: true,
            instances: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// Group available iff at least one instance is present.
    #[must_use]
    pub fn from_instances(instances: BTreeSet<u8>) -> Self {
        Self {
            available: !instances.is_empty(),
            instances,
        }
    }
}

/// A probe that failed (as opposed to answering "absent").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDiagnostic {
    pub group: GroupId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordinal: Option<u8>,
    pub location: String,
    pub outcome: ProbeOutcome,
}

/// The subset of catalog groups confirmed present on a device instance.
///
/// Built in one piece by discovery and never partially updated; a refresh
/// produces a new set that replaces the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySet {
    groups: BTreeMap<GroupId, GroupAvailability>,
    discovered_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    diagnostics: Vec<ProbeDiagnostic>,
}

impl CapabilitySet {
    /// Creates a set from discovery results. Groups missing from `groups`
    /// are treated as absent.
    #[must_use]
    pub fn new(
        groups: BTreeMap<GroupId, GroupAvailability>,
        diagnostics: Vec<ProbeDiagnostic>,
    ) -> Self {
        Self {
            groups,
            discovered_at: Utc::now(),
            diagnostics,
        }
    }

    /// A set marking every catalog group and instance present.
    #[must_use]
    pub fn assume_all(catalog: &Catalog) -> Self {
        let groups = catalog
            .groups()
            .map(|g| {
                let availability = if g.ordinals.is_some() {
                    GroupAvailability::from_instances(g.instances().into_iter().collect())
                } else {
                    GroupAvailability::present()
                };
                (g.id, availability)
            })
            .collect();
        Self::new(groups, Vec::new())
    }

    #[must_use]
    pub fn is_available(&self, group: GroupId) -> bool {
        self.groups.get(&group).is_some_and(|a| a.available)
    }

    /// Present instances of a group, in ascending order.
    ///
    /// Empty when the group is unavailable.
    pub fn instances(&self, group: GroupId) -> impl Iterator<Item = u8> + '_ {
        self.groups
            .get(&group)
            .filter(|a| a.available)
            .into_iter()
            .flat_map(|a| a.instances.iter().copied())
    }

    pub fn groups(&self) -> &BTreeMap<GroupId, GroupAvailability> {
        &self.groups
    }

    /// Available groups in evaluation order.
    #[must_use]
    pub fn available_groups(&self) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|(_, a)| a.available)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    pub fn diagnostics(&self) -> &[ProbeDiagnostic] {
        &self.diagnostics
    }
}

/// Equality ignores the discovery timestamp: two discoveries of an unchanged
/// device compare equal.
impl PartialEq for CapabilitySet {
    fn eq(&self, other: &Self) -> bool {
        self.groups == other.groups && self.diagnostics == other.diagnostics
    }
}

impl Eq for CapabilitySet {}
