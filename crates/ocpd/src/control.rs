//! Validated writes to the small set of writable configuration attributes.
//!
//! Every write is checked against the list the driver advertises for that
//! attribute (`available_clock_sources`, `available_sma_inputs`,
//! `available_sma_outputs`) before anything touches the device.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All failures surface as `WriteError`

use std::io;

use ocp_core::value::parse_list;
use ocp_core::{AttributeName, DomainError, GroupId, ReadOutcome};
use thiserror::Error;
use tracing::info;

use crate::reader::{BoundedReader, Unfinished};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while writing an attribute.
#[derive(Debug, Error)]
pub enum WriteError {
    /// SMA port outside the catalog range
    #[error("invalid SMA port {port} (expected 1..={max})")]
    InvalidPort { port: u8, max: u8 },

    /// Value is not in the advertised list
    #[error("invalid value '{value}' for {attribute} (allowed: {})", .allowed.join(", "))]
    InvalidValue {
        attribute: String,
        value: String,
        allowed: Vec<String>,
    },

    /// The advertised list could not be read, so the value cannot be checked
    #[error("cannot validate {attribute}: allowed values unavailable ({reason})")]
    AllowedValuesUnavailable { attribute: String, reason: String },

    /// Target attribute does not exist on this device
    #[error("attribute not found: {0}")]
    NotFound(String),

    /// Process lacks write permission
    #[error("permission denied writing {0}")]
    PermissionDenied(String),

    /// Write did not complete within the ceiling
    #[error("write to {0} timed out")]
    TimedOut(String),

    /// Other I/O failure
    #[error("failed to write {attribute}: {message}")]
    Io { attribute: String, message: String },

    /// Attribute name did not resolve
    #[error(transparent)]
    Resolve(#[from] DomainError),
}

// ============================================================================
// Attribute Writer
// ============================================================================

/// Applies validated configuration changes to one device.
#[derive(Debug, Clone)]
pub struct AttributeWriter {
    reader: BoundedReader,
}

impl AttributeWriter {
    pub fn new(reader: BoundedReader) -> Self {
        Self { reader }
    }

    /// Selects the reference clock source.
    pub async fn set_clock_source(&self, source: &str) -> Result<(), WriteError> {
        let target = AttributeName::new(GroupId::Basic, None, "clock_source");
        let allowed = AttributeName::new(GroupId::Basic, None, "available_clock_sources");
        self.write_checked(target, allowed, source).await
    }

    /// Routes `signal` to the input side of SMA connector `port`.
    pub async fn set_sma_input(&self, port: u8, signal: &str) -> Result<(), WriteError> {
        self.check_port(port)?;
        let target = AttributeName::new(GroupId::Sma, Some(port), "input");
        let allowed = AttributeName::new(GroupId::Sma, None, "available_inputs");
        self.write_checked(target, allowed, signal).await
    }

    /// Routes `signal` to the output side of SMA connector `port`.
    pub async fn set_sma_output(&self, port: u8, signal: &str) -> Result<(), WriteError> {
        self.check_port(port)?;
        let target = AttributeName::new(GroupId::Sma, Some(port), "output");
        let allowed = AttributeName::new(GroupId::Sma, None, "available_outputs");
        self.write_checked(target, allowed, signal).await
    }

    fn check_port(&self, port: u8) -> Result<(), WriteError> {
        let group = self.reader.catalog().group(GroupId::Sma);
        if group.is_some_and(|g| g.contains(port)) {
            return Ok(());
        }
        let max = group
            .and_then(|g| g.ordinals.as_ref())
            .map(|r| *r.end())
            .unwrap_or(0);
        Err(WriteError::InvalidPort { port, max })
    }

    async fn write_checked(
        &self,
        target: AttributeName,
        allowed_list: AttributeName,
        value: &str,
    ) -> Result<(), WriteError> {
        let value = value.trim();
        let allowed_result = self.reader.read(&allowed_list).await?;
        let allowed = match allowed_result.outcome {
            ReadOutcome::Value(raw) => parse_list(&raw),
            other => {
                return Err(WriteError::AllowedValuesUnavailable {
                    attribute: target.to_string(),
                    reason: other.to_string(),
                })
            }
        };

        if !allowed.iter().any(|a| a == value) {
            return Err(WriteError::InvalidValue {
                attribute: target.to_string(),
                value: value.to_string(),
                allowed,
            });
        }

        let path = self.reader.root().resolve(&target, self.reader.catalog())?;
        let attribute = target.to_string();
        match self.reader.write_path(&path, value.to_string()).await {
            Ok(Ok(())) => {
                info!(attribute = %attribute, value, "Attribute updated");
                Ok(())
            }
            Ok(Err(e)) => Err(match e.kind() {
                io::ErrorKind::NotFound => WriteError::NotFound(attribute),
                io::ErrorKind::PermissionDenied => WriteError::PermissionDenied(attribute),
                _ => WriteError::Io {
                    attribute,
                    message: e.to_string(),
                },
            }),
            Err(Unfinished::TimedOut) => Err(WriteError::TimedOut(attribute)),
            Err(Unfinished::Spawn(e)) => Err(WriteError::Io {
                attribute,
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocp_core::{Catalog, DeviceRoot};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> AttributeWriter {
        AttributeWriter::new(BoundedReader::new(
            DeviceRoot::new(dir.path()),
            Arc::new(Catalog::ptp_ocp()),
            Duration::from_millis(500),
        ))
    }

    #[tokio::test]
    async fn test_set_clock_source() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("available_clock_sources"), "NONE PPS GNSS\n").unwrap();
        fs::write(dir.path().join("clock_source"), "NONE\n").unwrap();

        writer(&dir).set_clock_source("GNSS").await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("clock_source")).unwrap(),
            "GNSS"
        );
    }

    #[tokio::test]
    async fn test_rejects_value_not_advertised() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("available_sma_inputs"), "PPS1 10Mhz\n").unwrap();
        fs::write(dir.path().join("sma1"), "PPS1\n").unwrap();

        let err = writer(&dir).set_sma_input(1, "pps1").await.unwrap_err();
        assert!(matches!(err, WriteError::InvalidValue { .. }));
        assert_eq!(fs::read_to_string(dir.path().join("sma1")).unwrap(), "PPS1\n");
    }

    #[tokio::test]
    async fn test_rejects_port_out_of_range() {
        let dir = TempDir::new().unwrap();
        let err = writer(&dir).set_sma_output(5, "PHC").await.unwrap_err();
        assert!(matches!(err, WriteError::InvalidPort { port: 5, max: 4 }));
        let err = writer(&dir).set_sma_output(0, "PHC").await.unwrap_err();
        assert!(matches!(err, WriteError::InvalidPort { port: 0, .. }));
    }

    #[tokio::test]
    async fn test_missing_allowed_list() {
        let dir = TempDir::new().unwrap();
        let err = writer(&dir).set_sma_output(1, "PHC").await.unwrap_err();
        assert!(matches!(err, WriteError::AllowedValuesUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_target_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("available_sma_outputs"), "PHC MAC\n").unwrap();
        let err = writer(&dir).set_sma_output(2, "MAC").await.unwrap_err();
        assert!(matches!(err, WriteError::NotFound(_)));
    }
}
