//! ocp-core - Shared types for timing card status monitoring
//!
//! This crate provides the domain types shared between the monitoring
//! engine (ocpd) and its front ends: the attribute catalog, path resolution,
//! capability sets, read outcomes, GNSS sync classification, derived health
//! checks, snapshots and change events. It performs no I/O.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod capability;
pub mod catalog;
pub mod error;
pub mod event;
pub mod health;
pub mod path;
pub mod read;
pub mod snapshot;
pub mod sync;
pub mod value;

// Re-exports for convenience
pub use capability::{CapabilitySet, GroupAvailability, ProbeDiagnostic};
pub use catalog::{AttributeGroup, Catalog, GroupId, Member};
pub use error::{DomainError, DomainResult, ResolveError};
pub use event::{diff, ChangeEvent};
pub use health::{HealthPolicy, HealthStatus, DEFAULT_DRIFT_THRESHOLD};
pub use path::{AttributeName, AttributePath, DeviceRoot};
pub use read::{AttributeReadResult, ProbeOutcome, ReadOutcome};
pub use snapshot::{
    BasicStatus, ClockStatus, FieldPath, FieldSection, FrequencyCounterStatus, GeneratorStatus,
    IrigStatus, SmaPort, SmaStatus, StatusSnapshot, TimestamperStatus, TodStatus,
};
pub use sync::{GnssSync, SyncState};
