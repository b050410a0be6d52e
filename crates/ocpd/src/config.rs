//! Engine configuration.
//!
//! Loaded from TOML, typically `$XDG_CONFIG_HOME/ocpmon/config.toml`. Every
//! field is optional; a missing file yields the defaults.
//!
//! ```toml
//! device_path = "/sys/class/timecard/ocp0"
//! read_timeout_ms = 3000
//! interval_ms = 1000
//! max_iterations = 86400
//! generator_count = 4
//! drift_threshold = 1000.0
//! ```
//!
//! The `OCP_DEVICE` environment variable overrides `device_path`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ocp_core::{Catalog, HealthPolicy, DEFAULT_DRIFT_THRESHOLD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::monitor::{MonitorOptions, DEFAULT_MAX_ITERATIONS};
use crate::reader::{clamp_ceiling, DEFAULT_READ_TIMEOUT};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable overriding the device path.
pub const DEVICE_ENV_VAR: &str = "OCP_DEVICE";

/// Directory holding one entry per timing card.
pub const DEFAULT_CLASS_DIR: &str = "/sys/class/timecard";

/// Default polling interval in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Largest instance count accepted for any numbered group.
pub const MAX_INSTANCE_COUNT: u8 = 32;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its acceptable domain
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ============================================================================
// Engine Config
// ============================================================================

/// Settings for one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device root. When unset the first device under `class_dir` is used.
    pub device_path: Option<PathBuf>,
    pub class_dir: PathBuf,
    pub read_timeout_ms: u64,
    /// Defaults to the read ceiling plus one second.
    pub stop_timeout_ms: Option<u64>,
    pub interval_ms: u64,
    pub max_iterations: u64,
    pub max_duration_secs: Option<u64>,
    pub sma_port_count: u8,
    pub generator_count: u8,
    pub frequency_counter_count: u8,
    /// Clock drift magnitudes below this pass the health check.
    pub drift_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            class_dir: PathBuf::from(DEFAULT_CLASS_DIR),
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            stop_timeout_ms: None,
            interval_ms: DEFAULT_INTERVAL_MS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_duration_secs: None,
            sma_port_count: 4,
            generator_count: 4,
            frequency_counter_count: 4,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ocpmon").join("config.toml"))
    }

    /// Parses a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Loads configuration, applies the environment override and validates.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// tried and silently skipped if absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(explicit) => Self::from_file(explicit)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => {
                    debug!(path = %default.display(), "Loading config");
                    Self::from_file(&default)?
                }
                _ => Self::default(),
            },
        };
        config.with_env().validate()
    }

    /// Applies `OCP_DEVICE` if set and non-empty.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(device) = env::var(DEVICE_ENV_VAR) {
            if !device.trim().is_empty() {
                self.device_path = Some(PathBuf::from(device.trim()));
            }
        }
        self
    }

    /// Rejects impossible values and clamps the rest into range.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.device_path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "device_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.class_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "class_dir",
                reason: "must not be empty".to_string(),
            });
        }
        for (field, count) in [
            ("sma_port_count", self.sma_port_count),
            ("generator_count", self.generator_count),
            ("frequency_counter_count", self.frequency_counter_count),
        ] {
            if count > MAX_INSTANCE_COUNT {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{count} exceeds maximum of {MAX_INSTANCE_COUNT}"),
                });
            }
        }
        if !(self.drift_threshold.is_finite() && self.drift_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                field: "drift_threshold",
                reason: format!("{} is not a positive number", self.drift_threshold),
            });
        }

        let requested = Duration::from_millis(self.read_timeout_ms);
        let clamped = clamp_ceiling(requested);
        if clamped != requested {
            warn!(
                requested_ms = self.read_timeout_ms,
                clamped_ms = clamped.as_millis() as u64,
                "read_timeout_ms out of range, clamping"
            );
            self.read_timeout_ms = clamped.as_millis() as u64;
        }

        let options = self.monitor_options();
        if options.interval.as_millis() as u64 != self.interval_ms {
            warn!(
                requested_ms = self.interval_ms,
                clamped_ms = options.interval.as_millis() as u64,
                "interval_ms out of range, clamping"
            );
            self.interval_ms = options.interval.as_millis() as u64;
        }
        self.max_iterations = options.max_iterations;

        Ok(self)
    }

    /// Per-operation read ceiling.
    pub fn read_timeout(&self) -> Duration {
        clamp_ceiling(Duration::from_millis(self.read_timeout_ms))
    }

    /// How long `stop` waits for the session task to exit.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.read_timeout() + Duration::from_secs(1))
    }

    /// Attribute catalog sized to the configured instance counts.
    pub fn catalog(&self) -> Catalog {
        Catalog::with_instance_counts(
            self.sma_port_count,
            self.generator_count,
            self.frequency_counter_count,
        )
    }

    /// Thresholds for the derived health checks.
    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            drift_threshold: self.drift_threshold,
        }
    }

    /// Default monitoring options derived from this config, normalized.
    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            interval: Duration::from_millis(self.interval_ms),
            max_iterations: self.max_iterations,
            max_duration: self.max_duration_secs.map(Duration::from_secs),
        }
        .normalized()
    }
}
