//! Application layer: the scheduler facade and its background loop.

pub mod scheduler;

pub use scheduler::{AgentStatus, Scheduler, SchedulerState, SchedulerStats};
