//! Engine configuration.
//!
//! Sources, later ones win:
//! 1. built-in defaults
//! 2. optional TOML file
//! 3. environment variables prefixed with `YIELDFLOW_` (e.g. `YIELDFLOW_BATCH_SIZE=50`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_PREFIX: &str = "YIELDFLOW_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tasks executed concurrently per chunk.
    pub batch_size: usize,
    /// Pause between chunks.
    pub chunk_delay_ms: u64,
    /// Failed attempts allowed per task.
    pub max_retry_count: u32,
    /// Delay before the deferred retry wave.
    pub retry_delay_secs: u64,
    /// Daily trigger time (UTC).
    pub daily_trigger_hour: u32,
    pub daily_trigger_minute: u32,
    pub health_poll_interval_secs: u64,
    pub retry_poll_interval_secs: u64,
    /// Resume batches left in PROCESSING when the process starts.
    pub auto_resume_on_startup: bool,
    pub recent_batches_limit: usize,
    pub storage_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            chunk_delay_ms: 2_000,
            max_retry_count: 3,
            retry_delay_secs: 300,
            daily_trigger_hour: 0,
            daily_trigger_minute: 0,
            health_poll_interval_secs: 300,
            retry_poll_interval_secs: 10,
            auto_resume_on_startup: false,
            recent_batches_limit: 20,
            storage_dir: PathBuf::from("./data"),
        }
    }
}

impl EngineConfig {
    /// Load defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: EngineConfig = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.daily_trigger_hour > 23 || self.daily_trigger_minute > 59 {
            return Err(ConfigError::Invalid(format!(
                "daily trigger time {:02}:{:02} is not a valid time of day",
                self.daily_trigger_hour, self.daily_trigger_minute
            )));
        }
        if self.health_poll_interval_secs == 0 || self.retry_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll intervals must be non-zero".into()));
        }
        Ok(())
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_delay_secs as i64)
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs)
    }

    pub fn retry_poll_interval(&self) -> Duration {
        Duration::from_secs(self.retry_poll_interval_secs)
    }

    /// Falls back to midnight for an out-of-range time; `validate` rejects those.
    pub fn daily_trigger_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.daily_trigger_hour, self.daily_trigger_minute, 0)
            .unwrap_or(NaiveTime::MIN)
    }
}
