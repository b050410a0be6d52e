//! ocpd - Status engine for ptp_ocp timing cards
//!
//! This crate reads a card's attribute namespace safely and turns it into
//! snapshots and change events:
//! - `reader` - Bounded reads with per-path quarantine of stuck attributes
//! - `discovery` - Device location and capability probing
//! - `builder` - Snapshot assembly from bounded reads
//! - `monitor` - Polling sessions with broadcast change events
//! - `control` - Validated writes to clock and SMA configuration
//! - `config` - TOML engine configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ PollingMonitor  │────▶│     SnapshotBuilder         │   │
//! │  │ (session task)  │     │  (one cycle of reads)       │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ events                      │ reads / probes    │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │broadcast::Sender│     │      BoundedReader          │   │
//! │  │ (SessionHandle) │     │ (detached thread + timeout) │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod builder;
pub mod config;
pub mod control;
pub mod discovery;
pub mod engine;
pub mod monitor;
pub mod reader;

pub use builder::{BuildError, SnapshotBuilder};
pub use config::{ConfigError, EngineConfig};
pub use control::{AttributeWriter, WriteError};
pub use discovery::{locate_devices, locate_first_device, CapabilityCache, CapabilityDiscoverer};
pub use engine::Engine;
pub use monitor::{
    MonitorError, MonitorEvent, MonitorOptions, PollingMonitor, SessionHandle, SessionState,
    SessionStatus, SessionSummary, StopReason,
};
pub use reader::BoundedReader;
