//! Change events derived by diffing consecutive snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::StatusSnapshot;

/// One field that differs between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Capture time of the newer snapshot.
    pub timestamp: DateTime<Utc>,
    /// Field location, e.g. `gnss.state` or `sma[1].input`.
    pub field: String,
    /// `None` when the field was absent in the older snapshot.
    pub old_value: Option<String>,
    /// `None` when the field is absent in the newer snapshot.
    pub new_value: Option<String>,
}

/// Computes the change set between two snapshots.
///
/// Events come out in evaluation order (basic, clock, GNSS, SMA, TOD, IRIG,
/// generators, frequency counters, timestampers, then health), so the
/// sequence is stable across cycles.
#[must_use]
pub fn diff(old: &StatusSnapshot, new: &StatusSnapshot) -> Vec<ChangeEvent> {
    let old_fields = old.fields();
    let new_fields = new.fields();

    let mut keys: Vec<_> = old_fields.keys().chain(new_fields.keys()).cloned().collect();
    keys.sort_unstable();
    keys.dedup();

    keys.into_iter()
        .filter_map(|key| {
            let before = old_fields.get(&key);
            let after = new_fields.get(&key);
            (before != after).then(|| ChangeEvent {
                timestamp: new.captured_at,
                field: key.to_string(),
                old_value: before.cloned(),
                new_value: after.cloned(),
            })
        })
        .collect()
}
