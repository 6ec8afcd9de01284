//! Scheduling services.
//!
//! Each service owns one concern. The router is the only component that
//! increments agent load; the dispatcher is the only one that releases it.

pub mod agent_registry;
pub mod dispatcher;
pub mod retry_policy;
pub mod router;
pub mod task_queue;
pub mod workload_tracker;

pub use agent_registry::AgentRegistry;
pub use dispatcher::{DispatchOutcome, Dispatcher, ExecutionError};
pub use retry_policy::RetryPolicy;
pub use router::{select_least_loaded, Assignment, Router};
pub use task_queue::{QueueStats, TaskQueue};
pub use workload_tracker::{SlotReservation, WorkloadTracker};
