//! Static catalog of the attribute groups exposed by a `ptp_ocp` timing card.
//!
//! The driver registers some attribute groups unconditionally (serial number,
//! clock source, SMA ports) and others only when the card's firmware carries
//! the matching block (signal generators, frequency counters, TOD, IRIG).
//! The catalog describes both kinds; which optional groups are actually
//! present on a given card is decided by capability discovery.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Placeholder substituted with the instance ordinal in leaf templates.
pub const ORDINAL_PLACEHOLDER: &str = "{n}";

/// Default number of instances for each ordinal group on current cards.
pub const DEFAULT_INSTANCE_COUNT: u8 = 4;

// ============================================================================
// Group Identifiers
// ============================================================================

/// Identifier of an attribute group.
///
/// Declaration order is the fixed evaluation order used when building
/// snapshots and when emitting change events.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    Basic,
    Clock,
    Gnss,
    Sma,
    Tod,
    Irig,
    Generator,
    FrequencyCounter,
    Timestamper,
}

impl GroupId {
    /// All groups in evaluation order.
    pub const ALL: [GroupId; 9] = [
        GroupId::Basic,
        GroupId::Clock,
        GroupId::Gnss,
        GroupId::Sma,
        GroupId::Tod,
        GroupId::Irig,
        GroupId::Generator,
        GroupId::FrequencyCounter,
        GroupId::Timestamper,
    ];

    /// Returns the name used in logical attribute paths.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Clock => "clock",
            Self::Gnss => "gnss",
            Self::Sma => "sma",
            Self::Tod => "tod",
            Self::Irig => "irig",
            Self::Generator => "generator",
            Self::FrequencyCounter => "frequency_counter",
            Self::Timestamper => "timestamper",
        }
    }

    /// Parses a group name as used in logical attribute paths.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.name() == name)
    }

    /// Whether the driver registers this group on every card.
    #[must_use]
    pub fn is_always_available(&self) -> bool {
        matches!(self, Self::Basic | Self::Clock | Self::Gnss | Self::Sma)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Members
// ============================================================================

/// One attribute inside a group.
///
/// Groups whose leaves are not known in advance (timestampers) have no
/// members; their directories are listed at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    /// Logical name (e.g. "duty").
    pub name: &'static str,
    /// Leaf path relative to the device root, `{n}` replaced by the ordinal.
    pub leaf: &'static str,
    /// Whether the member exists once per ordinal instance.
    pub per_instance: bool,
}

impl Member {
    const fn shared(name: &'static str, leaf: &'static str) -> Self {
        Self {
            name,
            leaf,
            per_instance: false,
        }
    }

    const fn instance(name: &'static str, leaf: &'static str) -> Self {
        Self {
            name,
            leaf,
            per_instance: true,
        }
    }

    /// Returns the leaf path for the given ordinal.
    #[must_use]
    pub fn leaf_for(&self, ordinal: Option<u8>) -> String {
        expand_template(self.leaf, ordinal)
    }
}

fn expand_template(template: &str, ordinal: Option<u8>) -> String {
    match ordinal {
        Some(n) => template.replace(ORDINAL_PLACEHOLDER, &n.to_string()),
        None => template.to_string(),
    }
}

// ============================================================================
// Attribute Group
// ============================================================================

/// A named optional cluster of related attributes tied to one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeGroup {
    pub id: GroupId,
    /// Ordinal range for groups with numbered instances.
    pub ordinals: Option<RangeInclusive<u8>>,
    /// Location whose existence marks the group (or one instance) present.
    ///
    /// `None` for always-available groups, which are never probed.
    pub probe: Option<&'static str>,
    pub members: Vec<Member>,
}

impl AttributeGroup {
    /// Whether discovery must probe for this group.
    #[must_use]
    pub fn is_probed(&self) -> bool {
        self.probe.is_some()
    }

    /// Ordinals of all instances the catalog allows for this group.
    #[must_use]
    pub fn instances(&self) -> Vec<u8> {
        self.ordinals
            .as_ref()
            .map(|r| r.clone().collect())
            .unwrap_or_default()
    }

    /// Whether `ordinal` lies within the group's range.
    #[must_use]
    pub fn contains(&self, ordinal: u8) -> bool {
        self.ordinals
            .as_ref()
            .map(|r| r.contains(&ordinal))
            .unwrap_or(false)
    }

    /// Looks up a member by logical name.
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Probe location for one instance (or the group if it has no ordinals).
    pub fn probe_leaf(&self, ordinal: Option<u8>) -> Option<String> {
        self.probe.map(|p| expand_template(p, ordinal))
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// The static set of attribute groups known for a device family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    groups: Vec<AttributeGroup>,
}

impl Catalog {
    /// Catalog for the `ptp_ocp` driver with the default instance counts.
    #[must_use]
    pub fn ptp_ocp() -> Self {
        Self::with_instance_counts(
            DEFAULT_INSTANCE_COUNT,
            DEFAULT_INSTANCE_COUNT,
            DEFAULT_INSTANCE_COUNT,
        )
    }

    /// Catalog for the `ptp_ocp` driver with custom instance counts.
    ///
    /// A count of zero leaves the group in the catalog with an empty range,
    /// so it is never reported available.
    #[must_use]
    pub fn with_instance_counts(sma_ports: u8, generators: u8, frequency_counters: u8) -> Self {
        // A count of zero yields 1..=0, which is empty.
        let range = |count: u8| 1..=count;

        let groups = vec![
            AttributeGroup {
                id: GroupId::Basic,
                ordinals: None,
                probe: None,
                members: vec![
                    Member::shared("serial_number", "serialnum"),
                    Member::shared("clock_source", "clock_source"),
                    Member::shared("available_clock_sources", "available_clock_sources"),
                ],
            },
            AttributeGroup {
                id: GroupId::Clock,
                ordinals: None,
                probe: None,
                members: vec![
                    Member::shared("drift", "clock_status_drift"),
                    Member::shared("offset", "clock_status_offset"),
                    Member::shared("utc_tai_offset", "utc_tai_offset"),
                    Member::shared("holdover", "holdover"),
                    Member::shared("internal_pps_cable_delay", "internal_pps_cable_delay"),
                    Member::shared("external_pps_cable_delay", "external_pps_cable_delay"),
                ],
            },
            AttributeGroup {
                id: GroupId::Gnss,
                ordinals: None,
                probe: None,
                members: vec![Member::shared("sync", "gnss_sync")],
            },
            AttributeGroup {
                id: GroupId::Sma,
                ordinals: Some(range(sma_ports)),
                probe: None,
                members: vec![
                    Member::shared("available_inputs", "available_sma_inputs"),
                    Member::shared("available_outputs", "available_sma_outputs"),
                    Member::instance("input", "sma{n}"),
                    Member::instance("output", "sma{n}_out"),
                ],
            },
            AttributeGroup {
                id: GroupId::Tod,
                ordinals: None,
                probe: Some("tod_protocol"),
                members: vec![
                    Member::shared("protocol", "tod_protocol"),
                    Member::shared("available_protocols", "available_tod_protocols"),
                    Member::shared("baud_rate", "tod_baud_rate"),
                    Member::shared("available_baud_rates", "available_tod_baud_rates"),
                    Member::shared("correction", "tod_correction"),
                ],
            },
            AttributeGroup {
                id: GroupId::Irig,
                ordinals: None,
                probe: Some("irig_b_mode"),
                members: vec![Member::shared("mode", "irig_b_mode")],
            },
            AttributeGroup {
                id: GroupId::Generator,
                ordinals: Some(range(generators)),
                probe: Some("gen{n}"),
                members: vec![
                    Member::instance("duty", "gen{n}/duty"),
                    Member::instance("period", "gen{n}/period"),
                    Member::instance("phase", "gen{n}/phase"),
                    Member::instance("polarity", "gen{n}/polarity"),
                    Member::instance("running", "gen{n}/running"),
                    Member::instance("start", "gen{n}/start"),
                    Member::instance("signal", "gen{n}/signal"),
                ],
            },
            AttributeGroup {
                id: GroupId::FrequencyCounter,
                ordinals: Some(range(frequency_counters)),
                probe: Some("freq{n}"),
                members: vec![
                    Member::instance("frequency", "freq{n}/frequency"),
                    Member::instance("seconds", "freq{n}/seconds"),
                ],
            },
            AttributeGroup {
                id: GroupId::Timestamper,
                ordinals: Some(range(DEFAULT_INSTANCE_COUNT)),
                probe: Some("ts{n}"),
                members: Vec::new(),
            },
        ];

        Self { groups }
    }

    /// Returns the group with the given identifier.
    pub fn group(&self, id: GroupId) -> Option<&AttributeGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Iterates over all groups in evaluation order.
    pub fn groups(&self) -> impl Iterator<Item = &AttributeGroup> {
        self.groups.iter()
    }

    /// Finds the first group without ordinals that has a member called `name`.
    ///
    /// Used to resolve bare names such as `clock_source`.
    pub fn find_shared(&self, name: &str) -> Option<(&AttributeGroup, &Member)> {
        self.groups
            .iter()
            .filter(|g| g.ordinals.is_none())
            .find_map(|g| g.member(name).map(|m| (g, m)))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::ptp_ocp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_in_evaluation_order() {
        let catalog = Catalog::ptp_ocp();
        let ids: Vec<GroupId> = catalog.groups().map(|g| g.id).collect();
        assert_eq!(ids, GroupId::ALL.to_vec());
    }

    #[test]
    fn test_always_available_groups_are_not_probed() {
        let catalog = Catalog::ptp_ocp();
        for group in catalog.groups() {
            assert_eq!(
                group.is_probed(),
                !group.id.is_always_available(),
                "group {} probe flag mismatch",
                group.id
            );
        }
    }

    #[test]
    fn test_member_leaf_expansion() {
        let catalog = Catalog::ptp_ocp();
        let generator = catalog.group(GroupId::Generator).unwrap();
        let duty = generator.member("duty").unwrap();
        assert_eq!(duty.leaf_for(Some(3)), "gen3/duty");
        assert_eq!(generator.probe_leaf(Some(2)).as_deref(), Some("gen2"));

        let sma = catalog.group(GroupId::Sma).unwrap();
        assert_eq!(sma.member("output").unwrap().leaf_for(Some(1)), "sma1_out");
        assert_eq!(
            sma.member("available_inputs").unwrap().leaf_for(None),
            "available_sma_inputs"
        );
    }

    #[test]
    fn test_timestamper_group() {
        let catalog = Catalog::ptp_ocp();
        let timestamper = catalog.group(GroupId::Timestamper).unwrap();
        assert_eq!(timestamper.instances(), vec![1, 2, 3, 4]);
        assert_eq!(timestamper.probe_leaf(Some(3)).as_deref(), Some("ts3"));
        assert!(timestamper.members.is_empty());
    }

    #[test]
    fn test_custom_instance_counts() {
        let catalog = Catalog::with_instance_counts(2, 8, 0);
        assert_eq!(catalog.group(GroupId::Sma).unwrap().instances(), vec![1, 2]);
        assert_eq!(catalog.group(GroupId::Generator).unwrap().instances().len(), 8);
        let counters = catalog.group(GroupId::FrequencyCounter).unwrap();
        assert!(counters.instances().is_empty());
        assert!(!counters.contains(1));
    }

    #[test]
    fn test_find_shared_skips_ordinal_groups() {
        let catalog = Catalog::ptp_ocp();
        let (group, member) = catalog.find_shared("clock_source").unwrap();
        assert_eq!(group.id, GroupId::Basic);
        assert_eq!(member.leaf, "clock_source");

        assert!(catalog.find_shared("duty").is_none());
        assert_eq!(catalog.find_shared("sync").unwrap().0.id, GroupId::Gnss);
    }

    #[test]
    fn test_group_names_round_trip() {
        for id in GroupId::ALL {
            assert_eq!(GroupId::from_name(id.name()), Some(id));
        }
        assert_eq!(GroupId::from_name("dcf"), None);
    }
}
