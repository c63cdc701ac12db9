//! Coordination configuration
//!
//! Built from defaults, then a TOML file, then `COORD_*` environment
//! variables. Every section is optional in the file.
//!
//! ```toml
//! database_path = "coordination.db"
//!
//! [events]
//! history_capacity = 1000
//! subscriber_capacity = 256
//!
//! [handoff]
//! overload_threshold = 0.8
//! underload_threshold = 0.5
//!
//! [maintenance]
//! interval_secs = 300
//! flush_retry = { max_attempts = 3, base_delay_ms = 1000 }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::EventBusConfig;
use crate::handoff::HandoffConfig;
use crate::metrics::MetricsConfig;
use crate::retry::RetryPolicy;

/// Errors loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Periodic flush and rebalance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub flush_retry: RetryPolicy,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            flush_retry: RetryPolicy::default(),
        }
    }
}

impl MaintenanceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Top-level configuration for the coordination core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub events: EventBusConfig,
    pub handoff: HandoffConfig,
    pub metrics: MetricsConfig,
    pub maintenance: MaintenanceConfig,
    /// SQLite database used by the `coordination` binary
    pub database_path: Option<PathBuf>,
}

impl CoordinationConfig {
    /// Defaults with `COORD_*` environment overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Parse a TOML file, then apply `COORD_*` environment overrides
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from `lookup`; unparsable values are ignored
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        if let Some(n) = parsed(lookup("COORD_HISTORY_CAPACITY")) {
            self.events.history_capacity = n;
        }
        if let Some(n) = parsed(lookup("COORD_SUBSCRIBER_CAPACITY")) {
            self.events.subscriber_capacity = n;
        }
        if let Some(v) = parsed(lookup("COORD_OVERLOAD_THRESHOLD")) {
            self.handoff.overload_threshold = v;
        }
        if let Some(v) = parsed(lookup("COORD_UNDERLOAD_THRESHOLD")) {
            self.handoff.underload_threshold = v;
        }
        if let Some(n) = parsed(lookup("COORD_MAX_TIMER_SAMPLES")) {
            self.metrics.max_timer_samples = n;
        }
        if let Some(n) = parsed(lookup("COORD_MAINTENANCE_INTERVAL_SECS")) {
            self.maintenance.interval_secs = n;
        }
        if let Some(n) = parsed(lookup("COORD_FLUSH_MAX_ATTEMPTS")) {
            self.maintenance.flush_retry.max_attempts = n;
        }
        if let Some(n) = parsed(lookup("COORD_FLUSH_BASE_DELAY_MS")) {
            self.maintenance.flush_retry.base_delay_ms = n;
        }
        if let Some(path) = lookup("COORD_DATABASE_PATH").filter(|p| !p.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
    }
}
