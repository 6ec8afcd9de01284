//! Taskmesh - capability-routed task scheduler
//!
//! Taskmesh accepts tasks that declare the capability tags they need, routes
//! each one to the least-loaded registered agent covering those tags, and
//! dispatches it with per-agent concurrency limits, bounded retries and
//! cancellation.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): task and agent models, errors, the agent port
//! - **Service Layer** (`services`): registry, queue, workload tracking, routing, dispatch
//! - **Application Layer** (`application`): the scheduler loop and its public API
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **Adapters** (`adapters`): built-in agent implementations
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use taskmesh::adapters::agents::BuiltinAgentFactory;
//! use taskmesh::{ConfigLoader, Scheduler, TaskSubmission};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let scheduler = Scheduler::from_config(&config, &BuiltinAgentFactory)?;
//!     scheduler.start().await?;
//!     scheduler.submit(TaskSubmission::new(serde_json::json!({"q": "rust"}), ["search"]))?;
//!     scheduler.wait_until_settled(std::time::Duration::from_secs(10)).await;
//!     scheduler.stop().await
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{Scheduler, SchedulerState, SchedulerStats};
pub use domain::errors::{ConfigError, SchedulerError, SchedulerResult, ValidationError};
pub use domain::models::{
    AgentDescriptor, AgentLoad, Config, LoggingConfig, RetryConfig, SchedulerConfig, Task,
    TaskPriority, TaskSnapshot, TaskStatus, TaskSubmission,
};
pub use domain::ports::{Agent, AgentError, AgentFactory};
pub use infrastructure::config::ConfigLoader;
pub use services::{AgentRegistry, DispatchOutcome, RetryPolicy};
