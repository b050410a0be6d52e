//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Logical attribute name does not match any catalog entry
    #[error("Unknown attribute: {name}")]
    UnknownAttribute { name: String },

    /// Ordinal outside the catalog range for its group
    #[error("Invalid {group} ordinal: {ordinal} (expected {min}..={max})")]
    OrdinalOutOfRange {
        group: String,
        ordinal: u8,
        min: u8,
        max: u8,
    },

    /// Path would escape the device namespace root
    #[error("Path escapes device namespace: {path}")]
    OutsideNamespace { path: String },

    /// Serialization of a snapshot failed
    #[error("Failed to export snapshot: {reason}")]
    ExportError { reason: String },
}

/// Caller errors raised while resolving an attribute path.
///
/// These are never device errors: a resolve failure means the caller asked
/// for something that cannot live inside the device namespace.
pub type ResolveError = DomainError;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
