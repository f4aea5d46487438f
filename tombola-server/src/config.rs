//! Configuration for tombola-server.
//!
//! Cadence settings come from a TOML file; the database URL comes from the
//! environment. A missing config file falls back to defaults, since every
//! setting has one.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tombola_core::processors::JobSchedule;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Scheduler cadence section, all values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub open_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub lottery_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub expiry_interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            open_interval_secs: default_interval_secs(),
            lottery_interval_secs: default_interval_secs(),
            expiry_interval_secs: default_interval_secs(),
        }
    }
}

impl FileConfig {
    /// Load the config file, or fall back to defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Convert the cadence section into a core `JobSchedule`.
    pub fn job_schedule(&self) -> JobSchedule {
        JobSchedule {
            open_interval: Duration::from_secs(self.scheduler.open_interval_secs),
            lottery_interval: Duration::from_secs(self.scheduler.lottery_interval_secs),
            expiry_interval: Duration::from_secs(self.scheduler.expiry_interval_secs),
        }
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_config_with_defaults() {
        let toml_str = r#"
[scheduler]
lottery_interval_secs = 300
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.lottery_interval_secs, 300);
        assert_eq!(config.scheduler.open_interval_secs, 60);

        let schedule = config.job_schedule();
        assert_eq!(schedule.lottery_interval, Duration::from_secs(300));
        assert_eq!(schedule.expiry_interval, Duration::from_secs(60));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config.job_schedule(), JobSchedule::default());
    }
}
