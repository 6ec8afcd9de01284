//! Executes assigned tasks on their agents.
//!
//! The dispatcher moves a task through `assigned -> running -> outcome`,
//! enforces the execution deadline, decides between retry and permanent
//! failure, and returns the agent slot when the run is over.

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::SchedulerError;
use crate::domain::models::{TaskStatus, TaskUpdate};
use crate::domain::ports::AgentError;
use crate::services::agent_registry::AgentRegistry;
use crate::services::retry_policy::RetryPolicy;
use crate::services::router::Assignment;
use crate::services::task_queue::TaskQueue;

/// Why a single run did not succeed.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("agent {agent_id} failed: {source}")]
    Agent {
        agent_id: String,
        #[source]
        source: AgentError,
    },

    #[error("execution exceeded {}s deadline", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("no execution handle registered for agent {0}")]
    MissingHandle(String),

    #[error("agent {agent_id} panicked: {message}")]
    Panicked { agent_id: String, message: String },
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Requeues the task if a dispatch is dropped before its run settles.
///
/// A dispatch future aborted at shutdown never reaches a final transition;
/// without this the task would stay `running` with no run behind it.
struct RunGuard<'a> {
    dispatcher: &'a Dispatcher,
    task_id: Uuid,
    settled: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.runs.remove(self.task_id);
        if !self.settled {
            self.dispatcher.queue.requeue_interrupted(self.task_id);
        }
    }
}

/// What became of one dispatched assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The agent returned a result and the task is `succeeded`
    Succeeded { task_id: Uuid, result: Value },
    /// The run failed and the task went back to `pending`
    Retrying {
        task_id: Uuid,
        attempt: u32,
        delay: Duration,
    },
    /// The run failed on its last attempt and the task is `failed`
    Failed { task_id: Uuid, attempts: u32 },
    /// The task was cancelled before or during the run; any result was dropped
    Cancelled { task_id: Uuid },
}

impl DispatchOutcome {
    pub const fn task_id(&self) -> Uuid {
        match self {
            Self::Succeeded { task_id, .. }
            | Self::Retrying { task_id, .. }
            | Self::Failed { task_id, .. }
            | Self::Cancelled { task_id } => *task_id,
        }
    }
}

/// Tokens of runs in progress, keyed by task.
#[derive(Debug, Default)]
struct RunTokens {
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl RunTokens {
    fn register(&self, task_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(task_id, token.clone());
        token
    }

    fn remove(&self, task_id: Uuid) {
        self.tokens.lock().remove(&task_id);
    }

    fn cancel(&self, task_id: Uuid) -> bool {
        self.tokens.lock().get(&task_id).map_or(false, |token| {
            token.cancel();
            true
        })
    }

    fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }
}

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    queue: Arc<TaskQueue>,
    retry: RetryPolicy,
    task_timeout: Duration,
    runs: RunTokens,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        queue: Arc<TaskQueue>,
        retry: RetryPolicy,
        task_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            queue,
            retry,
            task_timeout,
            runs: RunTokens::default(),
        }
    }

    /// Run one assignment to its outcome.
    ///
    /// The agent slot reserved by the router is released exactly once,
    /// after the task has left `running`.
    pub async fn dispatch(&self, assignment: Assignment) -> DispatchOutcome {
        let Assignment {
            task,
            agent,
            reservation,
        } = assignment;
        let task_id = task.id;

        let token = self.runs.register(task_id);
        let mut guard = RunGuard {
            dispatcher: self,
            task_id,
            settled: false,
        };
        let outcome = self.run(task_id, &agent.id, task.payload, token).await;
        guard.settled = true;
        drop(guard);
        reservation.release();

        outcome
    }

    async fn run(
        &self,
        task_id: Uuid,
        agent_id: &str,
        payload: Value,
        token: CancellationToken,
    ) -> DispatchOutcome {
        if let Err(e) = self.queue.transition(
            task_id,
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskUpdate::default(),
        ) {
            info!(task_id = %task_id, agent_id, error = %e, "task not started");
            return DispatchOutcome::Cancelled { task_id };
        }
        info!(task_id = %task_id, agent_id, "task started");

        let started = std::time::Instant::now();
        let result = match self.registry.handle(agent_id) {
            Some(agent) => {
                let execution = AssertUnwindSafe(agent.execute(payload, token.clone())).catch_unwind();
                match tokio::time::timeout(self.task_timeout, execution).await {
                    Ok(Ok(Ok(value))) => Ok(value),
                    Ok(Ok(Err(source))) => Err(ExecutionError::Agent {
                        agent_id: agent_id.to_string(),
                        source,
                    }),
                    Ok(Err(panic)) => Err(ExecutionError::Panicked {
                        agent_id: agent_id.to_string(),
                        message: panic_message(panic.as_ref()),
                    }),
                    Err(_) => {
                        token.cancel();
                        Err(ExecutionError::Timeout(self.task_timeout))
                    }
                }
            }
            None => Err(ExecutionError::MissingHandle(agent_id.to_string())),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(value) => self.complete(task_id, agent_id, value, elapsed_ms),
            Err(e) => self.fail(task_id, agent_id, &e, elapsed_ms),
        }
    }

    fn complete(&self, task_id: Uuid, agent_id: &str, value: Value, elapsed_ms: u64) -> DispatchOutcome {
        match self.queue.transition(
            task_id,
            TaskStatus::Running,
            TaskStatus::Succeeded,
            TaskUpdate::success(value.clone()),
        ) {
            Ok(_) => {
                info!(task_id = %task_id, agent_id, elapsed_ms, "task succeeded");
                DispatchOutcome::Succeeded {
                    task_id,
                    result: value,
                }
            }
            Err(e) => self.discarded(task_id, agent_id, &e),
        }
    }

    fn fail(&self, task_id: Uuid, agent_id: &str, err: &ExecutionError, elapsed_ms: u64) -> DispatchOutcome {
        let Some(task) = self.queue.get(task_id) else {
            return self.discarded(task_id, agent_id, &SchedulerError::TaskNotFound(task_id));
        };

        if task.is_last_attempt() {
            return match self.queue.transition(
                task_id,
                TaskStatus::Running,
                TaskStatus::Failed,
                TaskUpdate::failure(err.to_string()),
            ) {
                Ok(task) => {
                    error!(
                        task_id = %task_id,
                        agent_id,
                        attempts = task.attempt_count,
                        elapsed_ms,
                        error = %err,
                        "task failed permanently"
                    );
                    DispatchOutcome::Failed {
                        task_id,
                        attempts: task.attempt_count,
                    }
                }
                Err(e) => self.discarded(task_id, agent_id, &e),
            };
        }

        let attempt = task.attempt_count + 1;
        let delay = self.retry.delay_for(attempt);
        let mut update = TaskUpdate::failure(err.to_string());
        let not_before = chrono::Duration::from_std(delay)
            .ok()
            .filter(|d| !d.is_zero())
            .and_then(|d| Utc::now().checked_add_signed(d));
        if let Some(at) = not_before {
            update = update.with_not_before(at);
        }

        match self
            .queue
            .transition(task_id, TaskStatus::Running, TaskStatus::Pending, update)
        {
            Ok(task) => {
                warn!(
                    task_id = %task_id,
                    agent_id,
                    attempt = task.attempt_count,
                    max_attempts = task.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "task attempt failed, requeued"
                );
                DispatchOutcome::Retrying {
                    task_id,
                    attempt: task.attempt_count,
                    delay,
                }
            }
            Err(e) => self.discarded(task_id, agent_id, &e),
        }
    }

    fn discarded(&self, task_id: Uuid, agent_id: &str, reason: &SchedulerError) -> DispatchOutcome {
        info!(task_id = %task_id, agent_id, reason = %reason, "run result discarded");
        DispatchOutcome::Cancelled { task_id }
    }

    /// Signal a run in progress to stop. Returns false if none is active.
    pub fn signal_cancel(&self, task_id: Uuid) -> bool {
        let signalled = self.runs.cancel(task_id);
        if signalled {
            debug!(task_id = %task_id, "cancellation signalled");
        }
        signalled
    }

    /// Signal every run in progress to stop.
    pub fn cancel_all(&self) -> usize {
        self.runs.cancel_all()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("retry", &self.retry)
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}
