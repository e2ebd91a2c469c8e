//! Configuration file (`tally.yml`).
//!
//! Every section has serde defaults, so a file only needs `renovate.url`.
//! `Config::validate` rejects values the scheduler cannot run with; the
//! process refuses to start rather than schedule with them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./tally.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub scheduler: SchedulerConfig,
    pub renovate: RenovateConfig,
    pub pull: PullConfig,
    pub sparse_metrics: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: String,
    pub metrics: MetricsEndpointConfig,
    pub internal_monitoring_listener_address: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            metrics: MetricsEndpointConfig::default(),
            internal_monitoring_listener_address: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsEndpointConfig {
    pub enabled: bool,
    pub enable_openmetrics_encoding: bool,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_openmetrics_encoding: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisConfig {
    /// Absent means single-instance, in-process mode.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    pub maximum_jobs_queue_size: u64,
    pub workers: usize,
    pub heartbeat: HeartbeatConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maximum_jobs_queue_size: 1000,
            workers: 4,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeartbeatConfig {
    pub interval_seconds: u64,
    pub ttl_seconds: u64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            ttl_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenovateConfig {
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PullConfig {
    pub metrics: TaskSchedule,
}

/// When a task family runs: once at startup, periodically, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskSchedule {
    pub on_init: bool,
    pub scheduled: bool,
    /// 0 disables the periodic run.
    pub interval_seconds: u64,
}

impl TaskSchedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// One-line description for the startup log.
    pub fn summary(&self) -> String {
        let scheduled = if self.scheduled {
            format!("every {}s", self.interval_seconds)
        } else {
            "no".to_string()
        };
        let on_init = if self.on_init { "yes" } else { "no" };
        format!("on-init: {on_init}, scheduled: {scheduled}")
    }
}

impl Default for TaskSchedule {
    fn default() -> Self {
        Self {
            on_init: true,
            scheduled: true,
            interval_seconds: 30,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen_address.trim().is_empty() {
            return Err(ConfigError::invalid("server.listen_address", "must not be empty"));
        }
        if self.scheduler.maximum_jobs_queue_size == 0 {
            return Err(ConfigError::invalid(
                "scheduler.maximum_jobs_queue_size",
                "must be at least 1",
            ));
        }
        if self.scheduler.workers == 0 {
            return Err(ConfigError::invalid("scheduler.workers", "must be at least 1"));
        }

        let heartbeat = &self.scheduler.heartbeat;
        if heartbeat.interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "scheduler.heartbeat.interval_seconds",
                "must be at least 1",
            ));
        }
        if heartbeat.interval_seconds >= heartbeat.ttl_seconds {
            return Err(ConfigError::invalid(
                "scheduler.heartbeat.ttl_seconds",
                format!(
                    "must be greater than the interval ({}s), got {}s",
                    heartbeat.interval_seconds, heartbeat.ttl_seconds
                ),
            ));
        }

        if self.renovate.url.trim().is_empty() {
            return Err(ConfigError::invalid("renovate.url", "is required"));
        }
        if self.pull.metrics.scheduled && self.pull.metrics.interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "pull.metrics.interval_seconds",
                "must be at least 1 when scheduled",
            ));
        }
        Ok(())
    }

    pub fn redis_url(&self) -> Option<&str> {
        self.redis.url.as_deref().filter(|url| !url.is_empty())
    }
}
