//! Attribute path resolution.
//!
//! Maps logical attribute names onto leaves of the device namespace:
//!
//! | Logical name                   | Leaf                       |
//! |--------------------------------|----------------------------|
//! | `clock_source`                 | `clock_source`             |
//! | `clock.drift`                  | `clock_status_drift`       |
//! | `sma.available_inputs`         | `available_sma_inputs`     |
//! | `sma[3].output`                | `sma3_out`                 |
//! | `generator[2].duty`            | `gen2/duty`                |
//! | `frequency_counter[1].seconds` | `freq1/seconds`            |
//!
//! Every resolved path is guaranteed to stay under the device root.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, GroupId};
use crate::error::{DomainError, DomainResult};

// ============================================================================
// Logical Attribute Name
// ============================================================================

/// A parsed, catalog-validated logical attribute name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeName {
    pub group: GroupId,
    pub ordinal: Option<u8>,
    pub member: &'static str,
}

impl AttributeName {
    /// Parses a logical name against the catalog.
    ///
    /// Accepted forms: `member` (groups without ordinals only),
    /// `group.member` and `group[n].member`.
    pub fn parse(input: &str, catalog: &Catalog) -> DomainResult<Self> {
        let input = input.trim();
        let unknown = || DomainError::UnknownAttribute {
            name: input.to_string(),
        };

        let Some((head, member_name)) = input.split_once('.') else {
            let (group, member) = catalog.find_shared(input).ok_or_else(unknown)?;
            return Ok(Self {
                group: group.id,
                ordinal: None,
                member: member.name,
            });
        };

        let (group_name, ordinal) = match head.split_once('[') {
            Some((name, rest)) => {
                let digits = rest.strip_suffix(']').ok_or_else(unknown)?;
                let ordinal: u8 = digits.parse().map_err(|_| unknown())?;
                (name, Some(ordinal))
            }
            None => (head, None),
        };

        let group_id = GroupId::from_name(group_name).ok_or_else(unknown)?;
        let group = catalog.group(group_id).ok_or_else(unknown)?;
        let member = group.member(member_name).ok_or_else(unknown)?;

        match (member.per_instance, ordinal) {
            (true, Some(n)) => {
                if !group.contains(n) {
                    let (min, max) = group
                        .ordinals
                        .as_ref()
                        .map(|r| (*r.start(), *r.end()))
                        .unwrap_or((0, 0));
                    return Err(DomainError::OrdinalOutOfRange {
                        group: group_id.name().to_string(),
                        ordinal: n,
                        min,
                        max,
                    });
                }
            }
            (false, None) => {}
            _ => return Err(unknown()),
        }

        Ok(Self {
            group: group_id,
            ordinal,
            member: member.name,
        })
    }

    /// Builds a name for a catalog member without parsing.
    #[must_use]
    pub fn new(group: GroupId, ordinal: Option<u8>, member: &'static str) -> Self {
        Self {
            group,
            ordinal,
            member,
        }
    }

    /// Returns the leaf path relative to the device root.
    pub fn leaf(&self, catalog: &Catalog) -> DomainResult<String> {
        catalog
            .group(self.group)
            .and_then(|g| g.member(self.member))
            .map(|m| m.leaf_for(self.ordinal))
            .ok_or_else(|| DomainError::UnknownAttribute {
                name: self.to_string(),
            })
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ordinal {
            Some(n) => write!(f, "{}[{}].{}", self.group, n, self.member),
            None => write!(f, "{}.{}", self.group, self.member),
        }
    }
}

// ============================================================================
// Device Root
// ============================================================================

/// Root directory of one device's attribute namespace.
///
/// Example: "/sys/class/timecard/ocp0"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRoot(PathBuf);

impl DeviceRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Returns the directory name (e.g. "ocp0").
    pub fn name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Resolves a relative leaf, rejecting anything that could leave the root.
    pub fn resolve_leaf(&self, leaf: &str) -> DomainResult<PathBuf> {
        let relative = Path::new(leaf);
        let confined = !leaf.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !confined {
            return Err(DomainError::OutsideNamespace {
                path: leaf.to_string(),
            });
        }

        Ok(self.0.join(relative))
    }

    /// Resolves a logical attribute to its location under this root.
    pub fn resolve(&self, name: &AttributeName, catalog: &Catalog) -> DomainResult<AttributePath> {
        let leaf = name.leaf(catalog)?;
        let path = self.resolve_leaf(&leaf)?;
        Ok(AttributePath {
            name: name.to_string(),
            path,
        })
    }

    /// Parses and resolves a logical name in one step.
    pub fn resolve_str(&self, name: &str, catalog: &Catalog) -> DomainResult<AttributePath> {
        let parsed = AttributeName::parse(name, catalog)?;
        self.resolve(&parsed, catalog)
    }
}

impl fmt::Display for DeviceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for DeviceRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// Resolved Path
// ============================================================================

/// A logical attribute name together with its resolved filesystem location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributePath {
    /// Logical name, or the raw leaf for uncatalogued locations.
    pub name: String,
    pub path: PathBuf,
}

impl AttributePath {
    /// Wraps a raw leaf under `root` that has no catalog entry.
    pub fn raw(root: &DeviceRoot, leaf: &str) -> DomainResult<Self> {
        Ok(Self {
            name: leaf.to_string(),
            path: root.resolve_leaf(leaf)?,
        })
    }

    pub fn as_path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> DeviceRoot {
        DeviceRoot::new("/sys/class/timecard/ocp0")
    }

    #[test]
    fn test_resolve_bare_name() {
        let catalog = Catalog::ptp_ocp();
        let path = root().resolve_str("clock_source", &catalog).unwrap();
        assert_eq!(path.name, "basic.clock_source");
        assert_eq!(
            path.path,
            PathBuf::from("/sys/class/timecard/ocp0/clock_source")
        );
    }

    #[test]
    fn test_resolve_generator_member() {
        let catalog = Catalog::ptp_ocp();
        let path = root().resolve_str("generator[2].duty", &catalog).unwrap();
        assert_eq!(path.name, "generator[2].duty");
        assert_eq!(
            path.path,
            PathBuf::from("/sys/class/timecard/ocp0/gen2/duty")
        );
    }

    #[test]
    fn test_resolve_sma_output_and_shared_member() {
        let catalog = Catalog::ptp_ocp();
        let out = root().resolve_str("sma[3].output", &catalog).unwrap();
        assert!(out.path.ends_with("sma3_out"));

        let inputs = root()
            .resolve_str("sma.available_inputs", &catalog)
            .unwrap();
        assert!(inputs.path.ends_with("available_sma_inputs"));
    }

    #[test]
    fn test_ordinal_out_of_range() {
        let catalog = Catalog::ptp_ocp();
        let err = AttributeName::parse("generator[5].duty", &catalog).unwrap_err();
        assert_eq!(
            err,
            DomainError::OrdinalOutOfRange {
                group: "generator".to_string(),
                ordinal: 5,
                min: 1,
                max: 4,
            }
        );
    }

    #[test]
    fn test_configurable_range_accepts_higher_ordinals() {
        let catalog = Catalog::with_instance_counts(4, 8, 4);
        assert!(AttributeName::parse("generator[8].period", &catalog).is_ok());
    }

    #[test]
    fn test_rejects_malformed_names() {
        let catalog = Catalog::ptp_ocp();
        for bad in [
            "",
            "duty",
            "generator.duty",
            "generator[x].duty",
            "generator[1.duty",
            "clock[1].drift",
            "nonexistent",
            "gnss.missing",
        ] {
            assert!(
                AttributeName::parse(bad, &catalog).is_err(),
                "expected '{bad}' to be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_leaf_rejects_escape() {
        for bad in ["../etc/passwd", "/etc/passwd", "gen1/../../x", "", "."] {
            assert!(
                matches!(
                    root().resolve_leaf(bad),
                    Err(DomainError::OutsideNamespace { .. })
                ),
                "expected '{bad}' to be rejected"
            );
        }
        assert!(root().resolve_leaf("gen1/duty").is_ok());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let catalog = Catalog::ptp_ocp();
        let name = AttributeName::new(GroupId::FrequencyCounter, Some(1), "seconds");
        let reparsed = AttributeName::parse(&name.to_string(), &catalog).unwrap();
        assert_eq!(name, reparsed);
    }

    #[test]
    fn test_device_root_name() {
        assert_eq!(root().name(), Some("ocp0"));
    }
}
