pub mod agent;
pub mod config;
pub mod task;

pub use agent::{AgentDescriptor, AgentEntry, AgentLoad, RegistryDocument};
pub use config::{Config, LoggingConfig, RetryConfig, SchedulerConfig};
pub use task::{
    normalize_tags, Task, TaskPriority, TaskSnapshot, TaskStatus, TaskSubmission, TaskUpdate,
};
