use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for taskmesh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Retry backoff configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Path to the agent registry document
    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    /// Interval between scheduling passes when nothing wakes the loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Attempts allowed for tasks that do not set their own limit
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Per-task execution deadline in seconds
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// How long `stop` waits for in-flight dispatches
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Terminal tasks older than this are purged (0 keeps them forever)
    #[serde(default)]
    pub retention_secs: u64,
}

fn default_registry_path() -> String {
    ".taskmesh/agents.yaml".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    250
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_task_timeout_secs() -> u64 {
    300
}

const fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
            poll_interval_ms: default_poll_interval_ms(),
            default_max_attempts: default_max_attempts(),
            task_timeout_secs: default_task_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            retention_secs: 0,
        }
    }
}

/// Retry backoff configuration
///
/// A failed task goes back to pending and is not routed again until its
/// backoff delay has elapsed. `initial_backoff_ms: 0` requeues immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor applied per failed attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Requeue failed tasks without delay.
    pub const fn immediate() -> Self {
        Self {
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            multiplier: 1.0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation for file output: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Write console logs to stderr
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_enable_stdout() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
            enable_stdout: default_enable_stdout(),
        }
    }
}
