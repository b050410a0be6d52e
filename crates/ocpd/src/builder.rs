//! Snapshot assembly.
//!
//! Reads always-available groups unconditionally and optional groups only
//! when the capability set says they exist. Numbered instances are read
//! independently, so a broken generator never hides its siblings.
//!
//! Per-attribute failures (absent leaf, timeout, unparseable text) simply
//! leave that field out. Only a vanished device root fails the build.
//!
//! Health checks are derived last, from the values just read, under the
//! builder's [`HealthPolicy`].
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Malformed values are omitted and logged at debug level

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use ocp_core::value::{parse_flag, parse_list, parse_number, parse_text};
use ocp_core::{
    AttributeName, BasicStatus, CapabilitySet, ClockStatus, FrequencyCounterStatus,
    GeneratorStatus, GnssSync, GroupId, HealthPolicy, IrigStatus, ProbeOutcome, SmaPort,
    SmaStatus, StatusSnapshot, TimestamperStatus, TodStatus,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::reader::BoundedReader;

// ============================================================================
// Error Types
// ============================================================================

/// Reasons a snapshot could not be assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The device root is gone or unreachable
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The stop token fired between reads
    #[error("snapshot build cancelled")]
    Cancelled,
}

// ============================================================================
// Snapshot Builder
// ============================================================================

/// Assembles [`StatusSnapshot`]s from bounded reads.
#[derive(Debug)]
pub struct SnapshotBuilder {
    reader: BoundedReader,
    health: HealthPolicy,
    sequence: AtomicU64,
}

impl SnapshotBuilder {
    pub fn new(reader: BoundedReader) -> Self {
        Self {
            reader,
            health: HealthPolicy::default(),
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_health_policy(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn reader(&self) -> &BoundedReader {
        &self.reader
    }

    pub fn health_policy(&self) -> HealthPolicy {
        self.health
    }

    /// Next value of the builder's own sequence, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    /// Builds a one-off snapshot numbered from the builder's own sequence.
    pub async fn build(&self, capabilities: &CapabilitySet) -> Result<StatusSnapshot, BuildError> {
        let sequence = self.next_sequence();
        self.build_cycle(capabilities, sequence, &CancellationToken::new())
            .await
    }

    /// Builds a snapshot, checking `cancel` before every read.
    ///
    /// # Errors
    ///
    /// - `BuildError::DeviceUnavailable` if the device root does not exist
    /// - `BuildError::Cancelled` if the token fires mid-build
    pub async fn build_cycle(
        &self,
        capabilities: &CapabilitySet,
        sequence: u64,
        cancel: &CancellationToken,
    ) -> Result<StatusSnapshot, BuildError> {
        let root = self.reader.root();
        match self.reader.probe_path(root.as_path()).await {
            ProbeOutcome::Present => {}
            other => {
                return Err(BuildError::DeviceUnavailable(format!(
                    "{root}: {}",
                    match other {
                        ProbeOutcome::Absent => "not found",
                        ProbeOutcome::PermissionDenied => "permission denied",
                        _ => "timed out",
                    }
                )))
            }
        }

        let captured_at = Utc::now();
        let cycle = Cycle {
            reader: &self.reader,
            cancel,
        };

        let basic = BasicStatus {
            serial_number: cycle.text(GroupId::Basic, None, "serial_number").await?,
            clock_source: cycle.text(GroupId::Basic, None, "clock_source").await?,
            available_clock_sources: cycle
                .list(GroupId::Basic, None, "available_clock_sources")
                .await?,
            ptp_device: cycle.link("ptp").await?,
            pps_device: cycle.link("pps").await?,
        };

        let clock = ClockStatus {
            drift: cycle.number(GroupId::Clock, None, "drift").await?,
            offset: cycle.number(GroupId::Clock, None, "offset").await?,
            utc_tai_offset: cycle.number(GroupId::Clock, None, "utc_tai_offset").await?,
            holdover: cycle.text(GroupId::Clock, None, "holdover").await?,
            internal_pps_cable_delay: cycle
                .number(GroupId::Clock, None, "internal_pps_cable_delay")
                .await?,
            external_pps_cable_delay: cycle
                .number(GroupId::Clock, None, "external_pps_cable_delay")
                .await?,
        };

        let gnss = GnssSync::from_raw(cycle.raw(GroupId::Gnss, None, "sync").await?);

        let sma = if capabilities.is_available(GroupId::Sma) {
            let mut status = SmaStatus {
                available_inputs: cycle.list(GroupId::Sma, None, "available_inputs").await?,
                available_outputs: cycle.list(GroupId::Sma, None, "available_outputs").await?,
                ports: BTreeMap::new(),
            };
            for n in capabilities.instances(GroupId::Sma) {
                let port = SmaPort {
                    input: cycle.text(GroupId::Sma, Some(n), "input").await?,
                    output: cycle.text(GroupId::Sma, Some(n), "output").await?,
                };
                if port.input.is_some() || port.output.is_some() {
                    status.ports.insert(n, port);
                }
            }
            let empty = status.ports.is_empty()
                && status.available_inputs.is_empty()
                && status.available_outputs.is_empty();
            (!empty).then_some(status)
        } else {
            None
        };

        let tod = if capabilities.is_available(GroupId::Tod) {
            Some(TodStatus {
                protocol: cycle.text(GroupId::Tod, None, "protocol").await?,
                available_protocols: cycle.list(GroupId::Tod, None, "available_protocols").await?,
                baud_rate: cycle.number(GroupId::Tod, None, "baud_rate").await?,
                available_baud_rates: cycle
                    .list(GroupId::Tod, None, "available_baud_rates")
                    .await?,
                correction: cycle.number(GroupId::Tod, None, "correction").await?,
            })
        } else {
            None
        };

        let irig = if capabilities.is_available(GroupId::Irig) {
            Some(IrigStatus {
                mode: cycle.number(GroupId::Irig, None, "mode").await?,
            })
        } else {
            None
        };

        let generators = if capabilities.is_available(GroupId::Generator) {
            let mut generators = BTreeMap::new();
            for n in capabilities.instances(GroupId::Generator) {
                let g = Some(n);
                let status = GeneratorStatus {
                    duty: cycle.number(GroupId::Generator, g, "duty").await?,
                    period: cycle.number(GroupId::Generator, g, "period").await?,
                    phase: cycle.number(GroupId::Generator, g, "phase").await?,
                    polarity: cycle.flag(GroupId::Generator, g, "polarity").await?,
                    running: cycle.flag(GroupId::Generator, g, "running").await?,
                    start: cycle.text(GroupId::Generator, g, "start").await?,
                    signal: cycle.text(GroupId::Generator, g, "signal").await?,
                };
                generators.insert(n, status);
            }
            Some(generators)
        } else {
            None
        };

        let frequency_counters = if capabilities.is_available(GroupId::FrequencyCounter) {
            let mut counters = BTreeMap::new();
            for n in capabilities.instances(GroupId::FrequencyCounter) {
                let f = Some(n);
                let status = FrequencyCounterStatus {
                    frequency: cycle.number(GroupId::FrequencyCounter, f, "frequency").await?,
                    seconds: cycle.number(GroupId::FrequencyCounter, f, "seconds").await?,
                };
                counters.insert(n, status);
            }
            Some(counters)
        } else {
            None
        };

        let timestampers = if capabilities.is_available(GroupId::Timestamper) {
            let group = self.reader.catalog().group(GroupId::Timestamper);
            let mut stamps = BTreeMap::new();
            for n in capabilities.instances(GroupId::Timestamper) {
                let Some(dir) = group.and_then(|g| g.probe_leaf(Some(n))) else {
                    continue;
                };
                stamps.insert(n, cycle.directory(&dir).await?);
            }
            Some(stamps)
        } else {
            None
        };

        let health = self.health.evaluate(&basic, &clock, &gnss);

        Ok(StatusSnapshot {
            sequence,
            captured_at,
            degraded: false,
            basic,
            clock,
            gnss,
            sma,
            tod,
            irig,
            generators,
            frequency_counters,
            timestampers,
            health,
        })
    }
}

// ============================================================================
// Cycle Helpers
// ============================================================================

/// Per-build read helpers sharing the reader and stop token.
struct Cycle<'a> {
    reader: &'a BoundedReader,
    cancel: &'a CancellationToken,
}

impl Cycle<'_> {
    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Device name behind a symlink leaf such as `ptp`.
    async fn link(&self, leaf: &str) -> Result<Option<String>, BuildError> {
        self.check_cancelled()?;
        match self.reader.link_name(leaf).await {
            Ok(name) => Ok(name),
            Err(e) => {
                warn!(leaf, error = %e, "Link does not resolve, skipping");
                Ok(None)
            }
        }
    }

    /// Every readable file of a directory whose contents are not catalogued.
    async fn directory(&self, dir: &str) -> Result<TimestamperStatus, BuildError> {
        self.check_cancelled()?;
        let names = match self.reader.list_files(dir).await {
            Ok(names) => names,
            Err(e) => {
                warn!(dir, error = %e, "Directory does not resolve, skipping");
                return Ok(TimestamperStatus::new());
            }
        };

        let mut files = TimestamperStatus::new();
        for name in names {
            self.check_cancelled()?;
            let leaf = format!("{dir}/{name}");
            let value = match self.reader.read_leaf(&leaf).await {
                Ok(result) => result.into_value(),
                Err(e) => {
                    warn!(leaf = %leaf, error = %e, "Leaf does not resolve, skipping");
                    None
                }
            };
            if let Some(value) = value {
                files.insert(name, value);
            }
        }
        Ok(files)
    }

    async fn raw(
        &self,
        group: GroupId,
        ordinal: Option<u8>,
        member: &'static str,
    ) -> Result<Option<String>, BuildError> {
        self.check_cancelled()?;

        let name = AttributeName::new(group, ordinal, member);
        match self.reader.read(&name).await {
            Ok(result) => Ok(result.into_value()),
            Err(e) => {
                warn!(attribute = %name, error = %e, "Attribute does not resolve, skipping");
                Ok(None)
            }
        }
    }

    async fn typed<T>(
        &self,
        group: GroupId,
        ordinal: Option<u8>,
        member: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>, BuildError> {
        let Some(raw) = self.raw(group, ordinal, member).await? else {
            return Ok(None);
        };
        let parsed = parse(&raw);
        if parsed.is_none() && !raw.is_empty() {
            debug!(
                attribute = %AttributeName::new(group, ordinal, member),
                value = %raw,
                "Unparseable attribute value, omitting"
            );
        }
        Ok(parsed)
    }

    async fn text(
        &self,
        group: GroupId,
        ordinal: Option<u8>,
        member: &'static str,
    ) -> Result<Option<String>, BuildError> {
        self.typed(group, ordinal, member, parse_text).await
    }

    async fn number<T: FromStr>(
        &self,
        group: GroupId,
        ordinal: Option<u8>,
        member: &'static str,
    ) -> Result<Option<T>, BuildError> {
        self.typed(group, ordinal, member, parse_number::<T>).await
    }

    async fn flag(
        &self,
        group: GroupId,
        ordinal: Option<u8>,
        member: &'static str,
    ) -> Result<Option<bool>, BuildError> {
        self.typed(group, ordinal, member, parse_flag).await
    }

    async fn list(
        &self,
        group: GroupId,
        ordinal: Option<u8>,
        member: &'static str,
    ) -> Result<Vec<String>, BuildError> {
        Ok(self
            .raw(group, ordinal, member)
            .await?
            .map(|raw| parse_list(&raw))
            .unwrap_or_default())
    }
}
