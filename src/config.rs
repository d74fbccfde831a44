//! Configuration loading and management.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Sweep scheduler tuning.
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file (":memory:" for tests).
    pub path: String,
}

/// Sweep scheduler tuning.
///
/// Defaults match the production cadence: a sweep every minute, first sweep
/// held back 30 seconds so startup isn't racing the platform connection.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Interval between sweeps.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Delay before the first sweep after start().
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Records processed between pacing pauses (0 disables pacing).
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Pause between batches, to stay under the gateway's rate limits.
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    /// How long a freshly swapped-in capability stays protected against
    /// re-registration as a temporary grant.
    #[serde(default = "default_protection_window_ms")]
    pub protection_window_ms: u64,
    /// Delay before the post-swap reconciliation check fires.
    #[serde(default = "default_reconcile_delay_ms")]
    pub reconcile_delay_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_initial_delay_ms() -> u64 {
    30_000
}

fn default_batch_size() -> u64 {
    5
}

fn default_batch_pause_ms() -> u64 {
    1_000
}

fn default_protection_window_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_reconcile_delay_ms() -> u64 {
    10_000
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
            initial_delay_ms: default_initial_delay_ms(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            protection_window_ms: default_protection_window_ms(),
            reconcile_delay_ms: default_reconcile_delay_ms(),
        }
    }
}

impl SweepConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn protection_window(&self) -> Duration {
        Duration::from_millis(self.protection_window_ms)
    }

    pub fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.reconcile_delay_ms)
    }

    /// Validate tuning values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_ms must be greater than zero".into(),
            ));
        }
        if self.protection_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "protection_window_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.sweep.validate()?;
        Ok(config)
    }
}
