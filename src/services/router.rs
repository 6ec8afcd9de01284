//! Capability-based, load-balanced routing.
//!
//! One `route_one` call picks the most senior pending task that can be placed,
//! reserves a slot on the least-loaded capable agent and moves the task to
//! `assigned`. The whole decision runs under a single routing lock, so two
//! routers can never both observe the same free slot.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{AgentDescriptor, Task, TaskStatus, TaskUpdate};
use crate::services::agent_registry::AgentRegistry;
use crate::services::task_queue::TaskQueue;
use crate::services::workload_tracker::{SlotReservation, WorkloadTracker};

/// A task bound to an agent with a reserved slot.
///
/// The slot is held until the assignment (or the reservation taken out of it)
/// is dropped.
#[derive(Debug)]
pub struct Assignment {
    pub task: Task,
    pub agent: AgentDescriptor,
    pub(crate) reservation: SlotReservation,
}

impl Assignment {
    pub fn task_id(&self) -> Uuid {
        self.task.id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }
}

#[derive(Debug)]
pub struct Router {
    registry: Arc<AgentRegistry>,
    tracker: Arc<WorkloadTracker>,
    queue: Arc<TaskQueue>,
    route_lock: Mutex<()>,
}

impl Router {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tracker: Arc<WorkloadTracker>,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            registry,
            tracker,
            queue,
            route_lock: Mutex::new(()),
        }
    }

    /// Agents allowed to run `task`: every agent covering its tags, or the
    /// fallback when none does.
    pub fn candidates_for(&self, task: &Task) -> Vec<&AgentDescriptor> {
        let capable = self.registry.lookup_by_tags(&task.required_tags);
        if capable.is_empty() {
            self.registry.fallback_agent().into_iter().collect()
        } else {
            capable
        }
    }

    /// Route the most senior placeable pending task, if any.
    ///
    /// Tasks whose candidates are all saturated, or that no agent can run, are
    /// left pending and skipped for the rest of this call.
    pub fn route_one(&self) -> Option<Assignment> {
        let _routing = self.route_lock.lock();
        let now = chrono::Utc::now();
        let mut blocked_tags: HashSet<BTreeSet<String>> = HashSet::new();
        let mut cursor: Option<Task> = None;

        loop {
            let task = self.queue.next_pending_after(cursor.as_ref(), |t| {
                t.is_routable_at(now) && !blocked_tags.contains(&t.required_tags)
            })?;

            let candidates = self.candidates_for(&task);
            if candidates.is_empty() {
                debug!(task_id = %task.id, tags = ?task.required_tags, "no agent can run task");
                blocked_tags.insert(task.required_tags.clone());
                cursor = Some(task);
                continue;
            }

            let loads = self.tracker.snapshot();
            let Some(agent) = select_least_loaded(&candidates, &loads) else {
                debug!(task_id = %task.id, tags = ?task.required_tags, "all candidate agents saturated");
                blocked_tags.insert(task.required_tags.clone());
                cursor = Some(task);
                continue;
            };

            let Some(reservation) =
                SlotReservation::acquire(&self.tracker, &agent.id, agent.max_concurrency)
            else {
                cursor = Some(task);
                continue;
            };

            match self.queue.transition(
                task.id,
                TaskStatus::Pending,
                TaskStatus::Assigned,
                TaskUpdate::assign(&agent.id),
            ) {
                Ok(assigned) => {
                    debug!(
                        task_id = %assigned.id,
                        agent_id = %agent.id,
                        load = self.tracker.load(&agent.id),
                        max = agent.max_concurrency,
                        "task assigned"
                    );
                    return Some(Assignment {
                        task: assigned,
                        agent: agent.clone(),
                        reservation,
                    });
                }
                Err(e) => {
                    // Raced with a cancel; the reservation drop returns the slot.
                    warn!(task_id = %task.id, error = %e, "assignment rejected");
                    drop(reservation);
                    cursor = Some(task);
                }
            }
        }
    }

    /// Route until nothing else can be placed.
    pub fn route_all(&self) -> Vec<Assignment> {
        std::iter::from_fn(|| self.route_one()).collect()
    }
}

/// Least-loaded agent with spare capacity.
///
/// Load is compared as the exact ratio `current / max` by cross-multiplying.
/// Ties go to the higher priority class, then the lexicographically smaller id.
pub fn select_least_loaded<'a>(
    candidates: &[&'a AgentDescriptor],
    loads: &HashMap<String, usize>,
) -> Option<&'a AgentDescriptor> {
    let load_of = |agent: &AgentDescriptor| loads.get(&agent.id).copied().unwrap_or(0);

    candidates
        .iter()
        .copied()
        .filter(|agent| load_of(agent) < agent.max_concurrency)
        .min_by(|a, b| {
            compare_load(load_of(a), a.max_concurrency, load_of(b), b.max_concurrency)
                .then_with(|| b.priority_class.cmp(&a.priority_class))
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Ordering of two agents by load ratio alone.
pub fn compare_load(a_load: usize, a_max: usize, b_load: usize, b_max: usize) -> Ordering {
    (a_load as u128 * b_max as u128).cmp(&(b_load as u128 * a_max as u128))
}
