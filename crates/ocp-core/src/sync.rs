//! GNSS synchronization state classification.
//!
//! The driver reports `gnss_sync` as either `SYNC` or `LOST @ <timestamp>`.
//! Classification is an exact match on the trimmed token; no substring or
//! character-class heuristics are applied.

use std::fmt;

use serde::{Deserialize, Serialize};

const SYNC_TOKEN: &str = "SYNC";
const LOST_PREFIX: &str = "LOST";

/// Synchronization state of the GNSS receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Synchronized,
    Lost,
    #[default]
    Unknown,
}

impl SyncState {
    /// Classifies a raw `gnss_sync` value.
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let value = raw.trim();
        if value.eq_ignore_ascii_case(SYNC_TOKEN) {
            return Self::Synchronized;
        }

        let starts_lost = value
            .get(..LOST_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(LOST_PREFIX));
        if starts_lost {
            Self::Lost
        } else {
            Self::Unknown
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Synchronized => "SYNCHRONIZED",
            Self::Lost => "LOST",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Classified GNSS state with the raw value kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GnssSync {
    pub state: SyncState,
    /// Raw value as read, including any trailing timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl GnssSync {
    /// Classifies an optional raw value; absence yields `Unknown`.
    #[must_use]
    pub fn from_raw(raw: Option<String>) -> Self {
        let state = raw
            .as_deref()
            .map(SyncState::classify)
            .unwrap_or(SyncState::Unknown);
        Self { state, raw }
    }
}
