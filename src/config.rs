//! Runtime configuration.
//!
//! Flags win over environment variables, which win over the defaults.
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Settings of the scheduled publication sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Updates fetched per batch.
    pub batch_size: usize,
    /// Pause between two sweeps.
    pub interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    #[error("sweep interval must be at least one second")]
    ZeroInterval,
}

/// Publishes scheduled updates once their date has passed
#[derive(Parser, Debug)]
#[command(name = "update-revisions")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory of the sled database holding the revisions
    #[arg(long, env = "UPDATE_REVISIONS_DATA", default_value = "./update-revisions.db")]
    pub data_dir: PathBuf,

    /// Seconds between two sweeps
    #[arg(long, env = "UPDATE_REVISIONS_SWEEP_INTERVAL", default_value_t = DEFAULT_SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// Scheduled updates fetched per batch
    #[arg(long, env = "UPDATE_REVISIONS_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Run a single sweep and exit
    #[arg(long)]
    pub once: bool,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn publisher_config(&self) -> Result<PublisherConfig, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }

        Ok(PublisherConfig {
            batch_size: self.batch_size,
            interval: Duration::from_secs(self.sweep_interval_secs),
        })
    }
}
