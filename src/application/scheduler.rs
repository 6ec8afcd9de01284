//! Scheduler with background dispatch loop.
//!
//! Owns the registry, queue, workload tracker, router and dispatcher, and
//! drives them from a single loop:
//!
//! ```text
//!   submit() ──► TaskQueue ◄──────────────┐
//!                   │                     │
//!        wake / poll interval             │ outcome
//!                   ▼                     │
//!                Router ──► Assignment ──► Dispatcher ──► Agent
//!                   │                     │
//!                   └──── WorkloadTracker ┘
//! ```
//!
//! The loop wakes on submissions, on completed dispatches and on a poll
//! interval (which also picks up tasks whose retry backoff has elapsed).

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{ConfigError, SchedulerError, SchedulerResult};
use crate::domain::models::{AgentLoad, Config, TaskSnapshot, TaskStatus, TaskSubmission};
use crate::domain::ports::AgentFactory;
use crate::services::{
    AgentRegistry, Assignment, DispatchOutcome, Dispatcher, QueueStats, RetryPolicy, Router,
    TaskQueue, WorkloadTracker,
};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No background loop
    Stopped,
    /// Loop is routing and dispatching
    Running,
    /// Draining in-flight dispatches
    Stopping,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

/// Load and configuration of one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub capability_tags: BTreeSet<String>,
    pub current: usize,
    pub max: usize,
    pub priority_class: i32,
    pub fallback: bool,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    pub tasks: QueueStats,
    pub agents: Vec<AgentStatus>,
    pub dispatched: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl DispatchCounters {
    fn record(&self, outcome: &DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Succeeded { .. } => &self.succeeded,
            DispatchOutcome::Retrying { .. } => &self.retried,
            DispatchOutcome::Failed { .. } => &self.failed,
            DispatchOutcome::Cancelled { .. } => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Components shared between the public handle and the background loop.
#[derive(Debug)]
struct Engine {
    registry: Arc<AgentRegistry>,
    tracker: Arc<WorkloadTracker>,
    queue: Arc<TaskQueue>,
    router: Router,
    dispatcher: Arc<Dispatcher>,
    wake: Notify,
    counters: DispatchCounters,
    poll_interval: Duration,
    shutdown_grace: Duration,
    retention: Option<Duration>,
}

impl Engine {
    /// Route everything placeable and spawn a dispatch per assignment.
    fn spawn_ready(&self, in_flight: &mut JoinSet<DispatchOutcome>) -> usize {
        let mut spawned = 0;
        while let Some(assignment) = self.router.route_one() {
            let dispatcher = Arc::clone(&self.dispatcher);
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            in_flight.spawn(async move { dispatcher.dispatch(assignment).await });
            spawned += 1;
        }
        spawned
    }

    fn record(&self, joined: Result<DispatchOutcome, JoinError>) {
        match joined {
            Ok(outcome) => {
                debug!(task_id = %outcome.task_id(), ?outcome, "dispatch finished");
                self.counters.record(&outcome);
            }
            Err(e) if e.is_cancelled() => {
                warn!("dispatch aborted during shutdown");
            }
            Err(e) => {
                error!(error = %e, "dispatch panicked");
            }
        }
    }

    fn purge_expired(&self) {
        let Some(retention) = self.retention else {
            return;
        };
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
            return;
        };
        let purged = self.queue.purge_terminal(cutoff);
        if purged > 0 {
            debug!(purged, "purged expired terminal tasks");
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: JoinSet<DispatchOutcome> = JoinSet::new();

        info!(poll_interval = ?self.poll_interval, "scheduler loop started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("scheduler loop received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
                () = self.wake.notified() => {}
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.record(joined);
                }
            }

            let spawned = self.spawn_ready(&mut in_flight);
            if spawned > 0 {
                debug!(spawned, in_flight = in_flight.len(), "dispatched tasks");
            }
            self.purge_expired();
        }

        self.drain(&mut in_flight).await;
        info!("scheduler loop stopped");
    }

    async fn drain(&self, in_flight: &mut JoinSet<DispatchOutcome>) {
        if in_flight.is_empty() {
            return;
        }
        info!(in_flight = in_flight.len(), "waiting for in-flight dispatches");

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(joined) = in_flight.join_next().await {
                self.record(joined);
            }
        })
        .await;

        if drained.is_err() {
            // Aborted dispatches put their tasks back to pending on drop.
            in_flight.abort_all();
            let signalled = self.dispatcher.cancel_all();
            warn!(
                remaining = in_flight.len(),
                signalled, "shutdown grace period elapsed, aborting dispatches"
            );
            while let Some(joined) = in_flight.join_next().await {
                self.record(joined);
            }
        }
    }
}

/// Capability-routed task scheduler.
///
/// # Examples
///
/// ```no_run
/// use taskmesh::adapters::agents::BuiltinAgentFactory;
/// use taskmesh::application::Scheduler;
/// use taskmesh::domain::models::{Config, TaskSubmission};
/// use serde_json::json;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::default();
/// let scheduler = Scheduler::from_config(&config, &BuiltinAgentFactory)?;
/// scheduler.start().await?;
///
/// let id = scheduler.submit(TaskSubmission::new(json!({"query": "rust"}), ["search"]))?;
/// scheduler.wait_until_settled(std::time::Duration::from_secs(30)).await;
/// println!("{:?}", scheduler.get_task(id)?.state);
///
/// scheduler.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Scheduler {
    engine: Arc<Engine>,
    state: RwLock<SchedulerState>,
    shutdown: RwLock<Option<CancellationToken>>,
    loop_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(registry: AgentRegistry, config: &Config) -> Self {
        let registry = Arc::new(registry);
        let tracker = Arc::new(WorkloadTracker::new());
        let queue = Arc::new(TaskQueue::new(config.scheduler.default_max_attempts));
        let router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            Arc::clone(&queue),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            RetryPolicy::from(&config.retry),
            Duration::from_secs(config.scheduler.task_timeout_secs),
        ));

        let retention = (config.scheduler.retention_secs > 0)
            .then(|| Duration::from_secs(config.scheduler.retention_secs));

        Self {
            engine: Arc::new(Engine {
                registry,
                tracker,
                queue,
                router,
                dispatcher,
                wake: Notify::new(),
                counters: DispatchCounters::default(),
                poll_interval: Duration::from_millis(config.scheduler.poll_interval_ms.max(1)),
                shutdown_grace: Duration::from_secs(config.scheduler.shutdown_grace_secs),
                retention,
            }),
            state: RwLock::new(SchedulerState::Stopped),
            shutdown: RwLock::new(None),
            loop_handle: RwLock::new(None),
        }
    }

    /// Load the registry named in `config` and build a scheduler around it.
    pub fn from_config(config: &Config, factory: &dyn AgentFactory) -> Result<Self, ConfigError> {
        let registry = AgentRegistry::load_from_file(&config.scheduler.registry_path, factory)?;
        Ok(Self::new(registry, config))
    }

    /// Accept a task. It is routed on the next pass.
    pub fn submit(&self, submission: TaskSubmission) -> SchedulerResult<Uuid> {
        let id = self.engine.queue.enqueue(submission)?;
        info!(task_id = %id, "task submitted");
        self.engine.wake.notify_one();
        Ok(id)
    }

    pub fn get_task(&self, task_id: Uuid) -> SchedulerResult<TaskSnapshot> {
        self.engine
            .queue
            .get(task_id)
            .map(|task| TaskSnapshot::from(&task))
            .ok_or(SchedulerError::TaskNotFound(task_id))
    }

    /// Snapshots in submission order, optionally filtered by state.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<TaskSnapshot> {
        self.engine
            .queue
            .list(status)
            .iter()
            .map(TaskSnapshot::from)
            .collect()
    }

    pub fn get_agent_load(&self, agent_id: &str) -> SchedulerResult<AgentLoad> {
        let agent = self
            .engine
            .registry
            .agent(agent_id)
            .ok_or_else(|| SchedulerError::AgentNotFound(agent_id.to_string()))?;
        Ok(AgentLoad {
            current: self.engine.tracker.load(agent_id),
            max: agent.max_concurrency,
        })
    }

    /// Cancel a task that has not finished.
    ///
    /// A running agent is signalled to stop and its eventual result is
    /// discarded. Returns the task's state after the call; cancelling a
    /// finished task leaves it untouched.
    pub fn cancel(&self, task_id: Uuid) -> SchedulerResult<TaskStatus> {
        let previous = self.engine.queue.cancel(task_id)?;
        if previous.is_terminal() {
            debug!(task_id = %task_id, state = %previous, "cancel ignored for finished task");
            return Ok(previous);
        }
        if previous.holds_agent() {
            self.engine.dispatcher.signal_cancel(task_id);
        }
        info!(task_id = %task_id, from = %previous, "task cancelled");
        Ok(TaskStatus::Cancelled)
    }

    /// Route a single task without the background loop.
    pub fn route_one(&self) -> Option<Assignment> {
        self.engine.router.route_one()
    }

    /// Execute an assignment on the caller's task.
    pub async fn dispatch(&self, assignment: Assignment) -> DispatchOutcome {
        self.engine.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let outcome = self.engine.dispatcher.dispatch(assignment).await;
        self.engine.counters.record(&outcome);
        self.engine.wake.notify_one();
        outcome
    }

    pub async fn stats(&self) -> SchedulerStats {
        let state = *self.state.read().await;
        let loads = self.engine.tracker.snapshot();
        let agents = self
            .engine
            .registry
            .descriptors()
            .iter()
            .map(|agent| AgentStatus {
                agent_id: agent.id.clone(),
                capability_tags: agent.capability_tags.clone(),
                current: loads.get(&agent.id).copied().unwrap_or(0),
                max: agent.max_concurrency,
                priority_class: agent.priority_class,
                fallback: agent.fallback,
            })
            .collect();
        let counters = &self.engine.counters;

        SchedulerStats {
            state,
            tasks: self.engine.queue.counts(),
            agents,
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            cancelled: counters.cancelled.load(Ordering::Relaxed),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.engine.registry
    }

    /// Start the background routing and dispatch loop.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != SchedulerState::Stopped {
            return Ok(());
        }

        info!(agents = self.engine.registry.len(), "starting scheduler");

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.engine).run(token.clone()));
        *self.shutdown.write().await = Some(token);
        *self.loop_handle.write().await = Some(handle);
        *state = SchedulerState::Running;

        Ok(())
    }

    /// Stop the loop, waiting up to the grace period for in-flight dispatches.
    ///
    /// Pending tasks stay pending. Dispatches still running after the grace
    /// period are aborted and their tasks return to `pending` without using
    /// up an attempt, so a later `start` runs them again.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state == SchedulerState::Stopped {
            return Ok(());
        }
        *state = SchedulerState::Stopping;
        drop(state);

        info!("stopping scheduler");

        if let Some(token) = self.shutdown.write().await.take() {
            token.cancel();
        }

        if let Some(handle) = self.loop_handle.write().await.take() {
            if let Err(e) = handle.await {
                warn!(error = ?e, "scheduler loop panicked");
            }
        }

        *self.state.write().await = SchedulerState::Stopped;
        info!("scheduler stopped");
        Ok(())
    }

    /// Wait until every task has reached a terminal state.
    ///
    /// Returns false if `timeout` elapses first. Tasks no agent can run stay
    /// pending, so a queue containing them never settles.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.engine.queue.all_settled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep((deadline - now).min(Duration::from_millis(20))).await;
        }
    }
}
