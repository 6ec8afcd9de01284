//! Domain errors for the taskmesh scheduler.

use thiserror::Error;
use uuid::Uuid;

use super::models::task::TaskStatus;

/// Errors raised while loading or validating configuration.
///
/// Covers both the agent registry document and the application config.
/// Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read registry source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed registry source: {0}")]
    Malformed(String),

    #[error("Registry defines no agents")]
    NoAgents,

    #[error("Agent '{0}' has an empty id")]
    EmptyAgentId(String),

    #[error("Agent '{0}' declares no capability tags")]
    EmptyCapabilities(String),

    #[error("Agent '{0}' declares a blank capability tag")]
    BlankCapability(String),

    #[error("Agent '{agent_id}' has invalid max_concurrency {value}. Must be positive")]
    InvalidConcurrency { agent_id: String, value: i64 },

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("Multiple fallback agents configured: {0} and {1}")]
    MultipleFallbacks(String, String),

    #[error("Agent '{agent_id}' has an unsupported behavior: {reason}")]
    UnsupportedBehavior { agent_id: String, reason: String },

    #[error("Invalid poll_interval_ms: {0}. Must be at least 1")]
    InvalidPollInterval(u64),

    #[error("Invalid default_max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid task_timeout_secs: {0}. Must be at least 1")]
    InvalidTaskTimeout(u64),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid backoff multiplier: {0}. Must be at least 1.0")]
    InvalidBackoffMultiplier(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Registry path cannot be empty")]
    EmptyRegistryPath,
}

/// Errors raised synchronously when a task submission is malformed.
///
/// A submission that fails validation never creates a task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Task must require at least one capability tag")]
    EmptyTags,

    #[error("Task requires a blank capability tag")]
    BlankTag,

    #[error("Invalid priority: {0} (must be one of low, normal, high, critical or 1-4)")]
    InvalidPriority(String),

    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),
}

/// Errors surfaced by scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid transition for task {task_id} from {from} to {to} (task is {actual})")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        actual: TaskStatus,
    },

    #[error("Transition to {0} requires an assigned agent")]
    MissingAssignment(TaskStatus),

    #[error("Task {task_id} has exhausted its {max_attempts} attempts")]
    AttemptsExhausted { task_id: Uuid, max_attempts: u32 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
