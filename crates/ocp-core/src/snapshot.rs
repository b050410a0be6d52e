//! Status snapshots: immutable pictures of device state at one instant.
//!
//! Optional groups are `Option`s and are skipped during serialization, so a
//! group the device lacks is absent from the output rather than filled with
//! placeholder errors.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::GroupId;
use crate::error::{DomainError, DomainResult};
use crate::health::HealthStatus;
use crate::sync::{GnssSync, SyncState};

// ============================================================================
// Group Sections
// ============================================================================

/// Attributes registered on every card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available_clock_sources: Vec<String>,
    /// Linked PTP clock device, e.g. `ptp3`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptp_device: Option<String>,
    /// Linked PPS device, e.g. `pps1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pps_device: Option<String>,
}

/// Clock discipline state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_tai_offset: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holdover: Option<String>,
    /// Nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_pps_cable_delay: Option<i64>,
    /// Nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_pps_cable_delay: Option<i64>,
}

/// Configuration of one SMA connector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmaPort {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// SMA connector configuration, only for ports that exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmaStatus {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available_inputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available_outputs: Vec<String>,
    pub ports: BTreeMap<u8, SmaPort>,
}

/// Time-of-day serial protocol block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available_protocols: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub available_baud_rates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<i64>,
}

/// IRIG-B output block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrigStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u8>,
}

/// One programmable signal generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorStatus {
    /// Percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duty: Option<u32>,
    /// Nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<u64>,
    /// Nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polarity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

/// One frequency counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyCounterStatus {
    /// Hertz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    /// Measurement window in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
}

/// Contents of one timestamper directory, file name to value.
pub type TimestamperStatus = BTreeMap<String, String>;

// ============================================================================
// Snapshot
// ============================================================================

/// A complete-at-capture-time picture of device status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Monotonic per-session sequence number.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    /// True when the device could not be read at all this cycle.
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub degraded: bool,
    pub basic: BasicStatus,
    pub clock: ClockStatus,
    pub gnss: GnssSync,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sma: Option<SmaStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tod: Option<TodStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irig: Option<IrigStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generators: Option<BTreeMap<u8, GeneratorStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_counters: Option<BTreeMap<u8, FrequencyCounterStatus>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestampers: Option<BTreeMap<u8, TimestamperStatus>>,
    /// Checks derived from the sections above.
    #[serde(default)]
    pub health: HealthStatus,
}

impl StatusSnapshot {
    /// A snapshot with every field unknown, used when the device vanished.
    #[must_use]
    pub fn degraded(sequence: u64, captured_at: DateTime<Utc>) -> Self {
        Self {
            sequence,
            captured_at,
            degraded: true,
            basic: BasicStatus::default(),
            clock: ClockStatus::default(),
            gnss: GnssSync::default(),
            sma: None,
            tod: None,
            irig: None,
            generators: None,
            frequency_counters: None,
            timestampers: None,
            health: HealthStatus::default(),
        }
    }

    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.gnss.state
    }

    /// Whether any data for `group` is present in this snapshot.
    #[must_use]
    pub fn has_group(&self, group: GroupId) -> bool {
        match group {
            GroupId::Basic | GroupId::Clock | GroupId::Gnss => !self.degraded,
            GroupId::Sma => self.sma.is_some(),
            GroupId::Tod => self.tod.is_some(),
            GroupId::Irig => self.irig.is_some(),
            GroupId::Generator => self.generators.is_some(),
            GroupId::FrequencyCounter => self.frequency_counters.is_some(),
            GroupId::Timestamper => self.timestampers.is_some(),
        }
    }

    /// Flattens the snapshot into `(field, value)` pairs in evaluation order.
    ///
    /// Absent fields are not listed.
    #[must_use]
    pub fn fields(&self) -> BTreeMap<FieldPath, String> {
        let mut sink = FieldSink::default();

        let mut s = sink.section(GroupId::Basic, None);
        s.field("serial_number", self.basic.serial_number.as_ref());
        s.field("clock_source", self.basic.clock_source.as_ref());
        s.list("available_clock_sources", &self.basic.available_clock_sources);
        s.field("ptp_device", self.basic.ptp_device.as_ref());
        s.field("pps_device", self.basic.pps_device.as_ref());

        let mut s = sink.section(GroupId::Clock, None);
        s.field("drift", self.clock.drift);
        s.field("offset", self.clock.offset);
        s.field("utc_tai_offset", self.clock.utc_tai_offset);
        s.field("holdover", self.clock.holdover.as_ref());
        s.field("internal_pps_cable_delay", self.clock.internal_pps_cable_delay);
        s.field("external_pps_cable_delay", self.clock.external_pps_cable_delay);

        let mut s = sink.section(GroupId::Gnss, None);
        s.field("state", Some(self.gnss.state));
        s.field("raw", self.gnss.raw.as_ref());

        if let Some(sma) = &self.sma {
            let mut s = sink.section(GroupId::Sma, None);
            s.list("available_inputs", &sma.available_inputs);
            s.list("available_outputs", &sma.available_outputs);
            for (port, cfg) in &sma.ports {
                let mut s = sink.section(GroupId::Sma, Some(*port));
                s.field("input", cfg.input.as_ref());
                s.field("output", cfg.output.as_ref());
            }
        }

        if let Some(tod) = &self.tod {
            let mut s = sink.section(GroupId::Tod, None);
            s.field("protocol", tod.protocol.as_ref());
            s.list("available_protocols", &tod.available_protocols);
            s.field("baud_rate", tod.baud_rate);
            s.list("available_baud_rates", &tod.available_baud_rates);
            s.field("correction", tod.correction);
        }

        if let Some(irig) = &self.irig {
            let mut s = sink.section(GroupId::Irig, None);
            s.field("mode", irig.mode);
        }

        for (n, generator) in self.generators.iter().flatten() {
            let mut s = sink.section(GroupId::Generator, Some(*n));
            s.field("duty", generator.duty);
            s.field("period", generator.period);
            s.field("phase", generator.phase);
            s.field("polarity", generator.polarity);
            s.field("running", generator.running);
            s.field("start", generator.start.as_ref());
            s.field("signal", generator.signal.as_ref());
        }

        for (n, counter) in self.frequency_counters.iter().flatten() {
            let mut s = sink.section(GroupId::FrequencyCounter, Some(*n));
            s.field("frequency", counter.frequency);
            s.field("seconds", counter.seconds);
        }

        for (n, files) in self.timestampers.iter().flatten() {
            let mut s = sink.section(GroupId::Timestamper, Some(*n));
            for (name, value) in files {
                s.field(name.clone(), Some(value));
            }
        }

        let mut s = sink.health();
        s.field("device_accessible", Some(self.health.device_accessible));
        s.field("serial_readable", Some(self.health.serial_readable));
        s.field("gnss_synchronized", Some(self.health.gnss_synchronized));
        s.field("clock_source_set", Some(self.health.clock_source_set));
        s.field("drift_acceptable", self.health.drift_acceptable);

        sink.fields
    }

    /// Pretty JSON with deterministic field order.
    pub fn to_json(&self) -> DomainResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| DomainError::ExportError {
            reason: e.to_string(),
        })
    }

    /// Flat `field,value` CSV of every present field.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("field,value\n");
        out.push_str(&format!(
            "captured_at,{}\n",
            self.captured_at.to_rfc3339()
        ));
        for (field, value) in self.fields() {
            out.push_str(&csv_escape(&field.to_string()));
            out.push(',');
            out.push_str(&csv_escape(&value));
            out.push('\n');
        }
        out
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ============================================================================
// Field Paths
// ============================================================================

/// Top-level part of a snapshot a field belongs to.
///
/// Attribute groups come first in evaluation order; derived health last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldSection {
    Group(GroupId),
    Health,
}

impl fmt::Display for FieldSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(group) => write!(f, "{group}"),
            Self::Health => write!(f, "health"),
        }
    }
}

/// Location of one field in a snapshot, e.g. `generator[2].duty`.
///
/// Ordering follows evaluation order: section, then ordinal, then the
/// position of the field within its section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    pub section: FieldSection,
    pub ordinal: Option<u8>,
    rank: u8,
    /// Catalog member name, or the file name for timestamper entries.
    pub member: Cow<'static, str>,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ordinal {
            Some(n) => write!(f, "{}[{}].{}", self.section, n, self.member),
            None => write!(f, "{}.{}", self.section, self.member),
        }
    }
}

#[derive(Default)]
struct FieldSink {
    fields: BTreeMap<FieldPath, String>,
}

impl FieldSink {
    fn section(&mut self, group: GroupId, ordinal: Option<u8>) -> Section<'_> {
        Section {
            sink: self,
            section: FieldSection::Group(group),
            ordinal,
            rank: 0,
        }
    }

    fn health(&mut self) -> Section<'_> {
        Section {
            sink: self,
            section: FieldSection::Health,
            ordinal: None,
            rank: 0,
        }
    }
}

struct Section<'a> {
    sink: &'a mut FieldSink,
    section: FieldSection,
    ordinal: Option<u8>,
    rank: u8,
}

impl Section<'_> {
    // Rank advances even for absent fields so positions stay stable.
    fn field<T: ToString>(&mut self, member: impl Into<Cow<'static, str>>, value: Option<T>) {
        if let Some(v) = value {
            let path = FieldPath {
                section: self.section,
                ordinal: self.ordinal,
                rank: self.rank,
                member: member.into(),
            };
            self.sink.fields.insert(path, v.to_string());
        }
        self.rank = self.rank.saturating_add(1);
    }

    fn list(&mut self, member: &'static str, values: &[String]) {
        let joined = (!values.is_empty()).then(|| values.join(" "));
        self.field(member, joined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthPolicy;

    fn sample() -> StatusSnapshot {
        let mut generators = BTreeMap::new();
        generators.insert(
            1,
            GeneratorStatus {
                duty: Some(50),
                period: Some(1_000_000_000),
                running: Some(false),
                ..Default::default()
            },
        );
        let basic = BasicStatus {
            serial_number: Some("MOCK-001".to_string()),
            clock_source: Some("PPS".to_string()),
            available_clock_sources: vec!["NONE".into(), "PPS".into()],
            ..Default::default()
        };
        let clock = ClockStatus {
            drift: Some(123.456),
            ..Default::default()
        };
        let gnss = GnssSync::from_raw(Some("SYNC".to_string()));
        let health = HealthPolicy::default().evaluate(&basic, &clock, &gnss);
        StatusSnapshot {
            sequence: 1,
            captured_at: Utc::now(),
            degraded: false,
            basic,
            clock,
            gnss,
            sma: None,
            tod: None,
            irig: None,
            generators: Some(generators),
            frequency_counters: None,
            timestampers: None,
            health,
        }
    }

    #[test]
    fn test_absent_groups_are_omitted_from_json() {
        let json = sample().to_json().unwrap();
        assert!(!json.contains("\"tod\""));
        assert!(!json.contains("\"sma\""));
        assert!(!json.contains("\"frequency_counters\""));
        assert!(!json.contains("\"timestampers\""));
        assert!(!json.contains("ptp_device"));
        assert!(!json.contains("null"));
        assert!(!json.contains("degraded"));
        assert!(json.contains("\"generators\""));
    }

    #[test]
    fn test_json_field_order_is_deterministic() {
        let json = sample().to_json().unwrap();
        let basic = json.find("\"basic\"").unwrap();
        let clock = json.find("\"clock\"").unwrap();
        let gnss = json.find("\"gnss\"").unwrap();
        let generators = json.find("\"generators\"").unwrap();
        assert!(basic < clock && clock < gnss && gnss < generators);
    }

    #[test]
    fn test_json_is_stable_across_serializations() {
        let snapshot = sample();
        assert_eq!(snapshot.to_json().unwrap(), snapshot.to_json().unwrap());

        let restored: StatusSnapshot = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(restored.to_json().unwrap(), snapshot.to_json().unwrap());
    }

    #[test]
    fn test_fields_in_evaluation_order() {
        let fields: Vec<String> = sample().fields().keys().map(|k| k.to_string()).collect();
        assert_eq!(
            fields,
            vec![
                "basic.serial_number",
                "basic.clock_source",
                "basic.available_clock_sources",
                "clock.drift",
                "gnss.state",
                "gnss.raw",
                "generator[1].duty",
                "generator[1].period",
                "generator[1].running",
                "health.device_accessible",
                "health.serial_readable",
                "health.gnss_synchronized",
                "health.clock_source_set",
                "health.drift_acceptable",
            ]
        );
    }

    #[test]
    fn test_timestamper_and_link_fields() {
        let mut snapshot = sample();
        snapshot.basic.ptp_device = Some("ptp3".to_string());
        let mut files = TimestamperStatus::new();
        files.insert("width".to_string(), "100".to_string());
        files.insert("enable".to_string(), "1".to_string());
        let mut timestampers = BTreeMap::new();
        timestampers.insert(2, files);
        snapshot.timestampers = Some(timestampers);

        assert!(snapshot.has_group(GroupId::Timestamper));
        let fields = snapshot.fields();
        let names: Vec<String> = fields.keys().map(|k| k.to_string()).collect();
        let ptp = names.iter().position(|n| n == "basic.ptp_device").unwrap();
        let enable = names.iter().position(|n| n == "timestamper[2].enable").unwrap();
        let width = names.iter().position(|n| n == "timestamper[2].width").unwrap();
        let health = names.iter().position(|n| n == "health.device_accessible").unwrap();
        assert!(ptp < enable && enable < width && width < health);
        assert!(snapshot.to_csv().contains("timestamper[2].width,100\n"));
    }

    #[test]
    fn test_degraded_snapshot_has_no_data() {
        let snapshot = StatusSnapshot::degraded(7, Utc::now());
        assert!(snapshot.degraded);
        assert_eq!(snapshot.sync_state(), SyncState::Unknown);
        for group in GroupId::ALL {
            assert!(!snapshot.has_group(group));
        }
        assert!(!snapshot.health.device_accessible);
        let fields: Vec<String> = snapshot.fields().keys().map(|k| k.to_string()).collect();
        assert_eq!(
            fields,
            vec![
                "gnss.state",
                "health.device_accessible",
                "health.serial_readable",
                "health.gnss_synchronized",
                "health.clock_source_set",
            ]
        );
        assert!(snapshot.to_json().unwrap().contains("\"degraded\": true"));
    }

    #[test]
    fn test_csv_export() {
        let mut snapshot = sample();
        snapshot.basic.serial_number = Some("A,B".to_string());
        let csv = snapshot.to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("field,value"));
        assert!(lines.next().unwrap().starts_with("captured_at,"));
        assert_eq!(lines.next(), Some("basic.serial_number,\"A,B\""));
        assert!(csv.contains("gnss.state,SYNCHRONIZED\n"));
        assert!(csv.contains("generator[1].period,1000000000\n"));
    }
}
