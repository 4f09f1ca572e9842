//! Configuration for the broker engine

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main broker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Step execution
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Transient failure handling
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Background driving of in-flight instances
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Step execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on a single step invocation, in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Delay before invoking a pending step again, in milliseconds
    #[serde(default = "default_pending_poll_interval")]
    pub pending_poll_interval_ms: u64,

    /// Consecutive pending polls one drive makes before yielding the
    /// instance to the next sweep
    #[serde(default = "default_max_pending_polls")]
    pub max_pending_polls: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
            pending_poll_interval_ms: default_pending_poll_interval(),
            max_pending_polls: default_max_pending_polls(),
        }
    }
}

impl RunnerConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn pending_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pending_poll_interval_ms)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between sweeps of in-flight instances, in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum instances driven concurrently
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_workflows: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrent_workflows: default_max_concurrent(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_step_timeout() -> u64 {
    30
}

fn default_pending_poll_interval() -> u64 {
    1000
}

fn default_max_pending_polls() -> u32 {
    600
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_concurrent() -> usize {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BrokerConfig {
    /// Load configuration from defaults, an optional file and `BROKER__*`
    /// environment variables (e.g. `BROKER__RETRY__MAX_ATTEMPTS=3`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&BrokerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BROKER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Configuration suited to tests: short timeouts, no backoff.
    pub fn immediate() -> Self {
        Self {
            runner: RunnerConfig {
                step_timeout_secs: 5,
                pending_poll_interval_ms: 0,
                max_pending_polls: 50,
            },
            retry: RetryPolicy::immediate(3),
            ..Default::default()
        }
    }
}
