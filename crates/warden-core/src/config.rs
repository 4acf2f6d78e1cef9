//! Engine configuration.
//!
//! Loaded from TOML. Every key has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! database_path = "/var/lib/warden/warden.db"
//!
//! [scheduler]
//! batch_size = 200
//! poll_interval = "1s"
//! staleness_window = "1ms"
//! discovery_interval = "30s"
//! max_attempts = 5
//!
//! [scheduler.backoff]
//! type = "exponential"
//! initial_delay = "500ms"
//! max_delay = "1m"
//! multiplier = 2.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database holding events, projections and checkpoints.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Catch-up scheduling.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("warden.db")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()
    }
}

/// Catch-up scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum events fetched and committed per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between fetches once a task has caught up.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Minimum age of an event before it is read.
    #[serde(default = "default_staleness_window", with = "humantime_serde")]
    pub staleness_window: Duration,

    /// Pause between instance discovery rounds.
    #[serde(default = "default_discovery_interval", with = "humantime_serde")]
    pub discovery_interval: Duration,

    /// Failed attempts at one batch before the task halts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_batch_size() -> usize {
    200
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_staleness_window() -> Duration {
    Duration::from_millis(1)
}

const fn default_discovery_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_attempts() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
            staleness_window: default_staleness_window(),
            discovery_interval: default_discovery_interval(),
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Sets the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the staleness window.
    #[must_use]
    pub const fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Sets the discovery interval.
    #[must_use]
    pub const fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    /// Sets the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "scheduler.batch_size must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "scheduler.max_attempts must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Validation(
                "scheduler.poll_interval must be positive".into(),
            ));
        }
        if self.discovery_interval.is_zero() {
            return Err(ConfigError::Validation(
                "scheduler.discovery_interval must be positive".into(),
            ));
        }
        if let BackoffConfig::Exponential { multiplier, .. } = self.backoff {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(ConfigError::Validation(format!(
                    "scheduler.backoff.multiplier must be a finite number >= 1, got {multiplier}"
                )));
            }
        }
        Ok(())
    }
}

/// Delay between attempts at a failing batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay.
    Fixed {
        /// Delay duration.
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,

        /// Multiplier for each retry (default: 2.0).
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },

    /// Linear backoff.
    Linear {
        /// Initial delay.
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        /// Increment per retry.
        #[serde(with = "humantime_serde")]
        increment: Duration,

        /// Maximum delay.
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Calculate the delay for a given attempt number (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let retries = attempt.saturating_sub(1);
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let exponent = i32::try_from(retries).unwrap_or(i32::MAX);
                let delay_secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                Duration::try_from_secs_f64(delay_secs)
                    .unwrap_or(*max_delay)
                    .min(*max_delay)
            },
            Self::Linear {
                initial_delay,
                increment,
                max_delay,
            } => increment
                .checked_mul(retries)
                .and_then(|step| step.checked_add(*initial_delay))
                .unwrap_or(*max_delay)
                .min(*max_delay),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
