//! Typed outcomes of bounded attribute reads and existence probes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::path::AttributePath;

/// Outcome of reading one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ReadOutcome {
    /// Trimmed UTF-8 content of the leaf.
    Value(String),
    /// The leaf does not exist. Expected for absent capabilities.
    NotFound,
    /// The leaf exists but the process lacks read permission.
    PermissionDenied,
    /// The read did not complete within the ceiling and was abandoned.
    TimedOut,
    /// The content could not be interpreted (encoding, directory, I/O).
    ReadError(String),
}

impl ReadOutcome {
    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::TimedOut => "timed_out",
            Self::ReadError(_) => "read_error",
        }
    }
}

impl fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::ReadError(detail) => write!(f, "read error: {detail}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Result of one bounded read, retained only while a snapshot is assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeReadResult {
    pub path: AttributePath,
    pub outcome: ReadOutcome,
    pub elapsed: Duration,
}

impl AttributeReadResult {
    /// Returns the value if the read succeeded.
    pub fn value(&self) -> Option<&str> {
        match &self.outcome {
            ReadOutcome::Value(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Consumes the result, returning the value if the read succeeded.
    pub fn into_value(self) -> Option<String> {
        match self.outcome {
            ReadOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self.outcome, ReadOutcome::NotFound)
    }
}

/// Outcome of an existence check. Never reads the leaf's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Present,
    Absent,
    PermissionDenied,
    TimedOut,
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }

    /// Whether the probe itself failed, as opposed to answering yes or no.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::TimedOut)
    }
}
