//! Engine facade wiring reader, discovery, builder, monitor and writer for
//! one device.

use std::sync::Arc;

use ocp_core::{CapabilitySet, DeviceRoot, StatusSnapshot};
use tracing::info;

use crate::builder::{BuildError, SnapshotBuilder};
use crate::config::EngineConfig;
use crate::control::AttributeWriter;
use crate::discovery::{CapabilityCache, CapabilityDiscoverer};
use crate::monitor::{
    MonitorError, MonitorOptions, PollingMonitor, SessionHandle, SessionState, SessionStatus,
    SessionSummary,
};
use crate::reader::BoundedReader;

/// Status engine for a single timing card.
///
/// Owns its state; two engines on the same device are fully independent.
pub struct Engine {
    reader: BoundedReader,
    capabilities: Arc<CapabilityCache>,
    builder: Arc<SnapshotBuilder>,
    monitor: PollingMonitor,
    writer: AttributeWriter,
    defaults: MonitorOptions,
}

impl Engine {
    /// Creates an engine for `root` using the ceilings, instance counts,
    /// health thresholds and monitor defaults from `config`. Performs no I/O.
    pub fn new(root: DeviceRoot, config: &EngineConfig) -> Self {
        let catalog = Arc::new(config.catalog());
        let reader = BoundedReader::new(root, catalog, config.read_timeout());
        let capabilities = Arc::new(CapabilityCache::new(CapabilityDiscoverer::new(
            reader.clone(),
        )));
        let builder = Arc::new(
            SnapshotBuilder::new(reader.clone()).with_health_policy(config.health_policy()),
        );
        let monitor = PollingMonitor::new(
            Arc::clone(&builder),
            Arc::clone(&capabilities),
            config.stop_timeout(),
        );
        let writer = AttributeWriter::new(reader.clone());

        info!(
            device = %reader.root(),
            read_timeout_ms = reader.ceiling().as_millis() as u64,
            "Engine created"
        );

        Self {
            reader,
            capabilities,
            builder,
            monitor,
            writer,
            defaults: config.monitor_options(),
        }
    }

    pub fn root(&self) -> &DeviceRoot {
        self.reader.root()
    }

    pub fn reader(&self) -> &BoundedReader {
        &self.reader
    }

    pub fn writer(&self) -> &AttributeWriter {
        &self.writer
    }

    /// Monitor options from the engine's configuration.
    pub fn default_options(&self) -> MonitorOptions {
        self.defaults
    }

    /// Returns the cached capability set, discovering on first use.
    pub async fn discover_capabilities(&self) -> Arc<CapabilitySet> {
        self.capabilities.get().await
    }

    /// Re-probes the device and replaces the cached capability set.
    pub async fn refresh_capabilities(&self) -> Arc<CapabilitySet> {
        self.capabilities.refresh().await
    }

    /// Takes one snapshot outside any monitoring session.
    pub async fn read_snapshot(&self) -> Result<StatusSnapshot, BuildError> {
        let capabilities = self.capabilities.get().await;
        self.builder.build(&capabilities).await
    }

    pub fn start_monitoring(&self, options: MonitorOptions) -> Result<SessionHandle, MonitorError> {
        self.monitor.start(options)
    }

    pub async fn stop_monitoring(&self) -> Result<SessionSummary, MonitorError> {
        self.monitor.stop().await
    }

    pub fn monitor_state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn monitor_status(&self) -> Option<SessionStatus> {
        self.monitor.status()
    }
}
