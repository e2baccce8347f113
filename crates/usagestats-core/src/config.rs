//! Configuration management for usage statistics reporting

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix for environment variable overrides, e.g. `USAGESTATS__REPORTING__FLUSH_INTERVAL`
pub const ENV_PREFIX: &str = "USAGESTATS";

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Reporting pipeline configuration
    pub reporting: ReportingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file, and the environment
    ///
    /// Later sources override earlier ones.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.reporting.flush_interval.is_zero() {
            return Err(Error::validation("reporting.flush_interval must be non-zero"));
        }
        if self.reporting.channel_capacity == 0 {
            return Err(Error::validation("reporting.channel_capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Reporting pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// How often aggregated stats are drained and handed to the sink
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Buffer size for incoming traces
    pub channel_capacity: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(20),
            channel_capacity: 10_000,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    #[default]
    Pretty,
    /// Single-line human readable output
    Compact,
    /// Newline delimited JSON
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
