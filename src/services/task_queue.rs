//! In-memory task store and pending index.
//!
//! Every task ever submitted lives here until purged. Pending tasks are also
//! indexed by (priority desc, sequence asc) so the router always sees the
//! most senior eligible task first. The sequence is assigned at enqueue, so
//! seniority never depends on the wall clock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{SchedulerError, SchedulerResult, ValidationError};
use crate::domain::models::{normalize_tags, Task, TaskPriority, TaskStatus, TaskSubmission, TaskUpdate};

type PendingKey = (Reverse<TaskPriority>, u64, Uuid);

fn pending_key(task: &Task) -> PendingKey {
    (Reverse(task.priority), task.sequence, task.id)
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: HashMap<Uuid, Task>,
    pending: BTreeSet<PendingKey>,
    next_sequence: u64,
}

impl QueueState {
    fn apply(
        &mut self,
        task_id: Uuid,
        expected: Option<TaskStatus>,
        to: TaskStatus,
        update: TaskUpdate,
    ) -> SchedulerResult<Task> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SchedulerError::TaskNotFound(task_id))?;

        let from = expected.unwrap_or(task.status);
        if task.status != from {
            return Err(SchedulerError::InvalidTransition {
                task_id,
                from,
                to,
                actual: task.status,
            });
        }

        let key = pending_key(task);
        task.transition_to(to, update)?;

        if from == TaskStatus::Pending {
            self.pending.remove(&key);
        }
        if to == TaskStatus::Pending {
            self.pending.insert(pending_key(task));
        }

        Ok(task.clone())
    }
}

/// Counts of tasks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl QueueStats {
    pub const fn total(&self) -> usize {
        self.pending + self.assigned + self.running + self.succeeded + self.failed + self.cancelled
    }

    /// Tasks not yet in a terminal state.
    pub const fn active(&self) -> usize {
        self.pending + self.assigned + self.running
    }

    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Assigned => self.assigned += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Succeeded => self.succeeded += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Owns every task record and serializes all state transitions.
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    default_max_attempts: u32,
}

impl TaskQueue {
    pub fn new(default_max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            default_max_attempts,
        }
    }

    /// Validate and store a new pending task.
    #[instrument(skip(self, submission), fields(priority = %submission.priority), err)]
    pub fn enqueue(&self, submission: TaskSubmission) -> Result<Uuid, ValidationError> {
        let tags = normalize_tags(&submission.required_tags)?;
        let max_attempts = submission.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(ValidationError::InvalidMaxAttempts(max_attempts));
        }

        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let task = Task::new(
            submission.payload,
            tags,
            submission.priority,
            max_attempts,
            sequence,
        );
        let id = task.id;
        state.pending.insert(pending_key(&task));
        state.tasks.insert(id, task);
        drop(state);

        debug!(task_id = %id, sequence, "task enqueued");
        Ok(id)
    }

    /// Most senior pending task accepted by `predicate`.
    ///
    /// Callers pass the predicate to skip tasks they already know they cannot
    /// place, so a saturated head never blocks the tasks behind it.
    pub fn next_pending<F>(&self, predicate: F) -> Option<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        self.next_pending_after(None, predicate)
    }

    /// Like `next_pending`, but only considers tasks junior to `after`.
    ///
    /// Lets a caller walk the pending index once instead of rescanning from
    /// the head after every rejected task.
    pub fn next_pending_after<F>(&self, after: Option<&Task>, mut predicate: F) -> Option<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        let state = self.state.lock();
        let lower = after.map_or(Bound::Unbounded, |task| Bound::Excluded(pending_key(task)));
        state
            .pending
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, _, id)| state.tasks.get(id))
            .find(|task| predicate(task))
            .cloned()
    }

    /// Atomically move a task from `from` to `to`.
    ///
    /// Fails with `InvalidTransition` if the task is no longer in `from`, or if
    /// the edge itself is illegal.
    pub fn transition(
        &self,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
        update: TaskUpdate,
    ) -> SchedulerResult<Task> {
        let task = self.state.lock().apply(task_id, Some(from), to, update)?;
        debug!(task_id = %task_id, %from, %to, "task transitioned");
        Ok(task)
    }

    /// Put a task whose run was interrupted back to `pending`.
    ///
    /// Applies only to `assigned` or `running` tasks; the interrupted run is
    /// not counted as a failed attempt. Returns whether the task was requeued.
    pub fn requeue_interrupted(&self, task_id: Uuid) -> bool {
        let mut state = self.state.lock();
        let Some(current) = state.tasks.get(&task_id).map(|t| t.status) else {
            return false;
        };
        if !current.holds_agent() {
            return false;
        }
        match state.apply(task_id, Some(current), TaskStatus::Pending, TaskUpdate::default()) {
            Ok(_) => {
                warn!(task_id = %task_id, from = %current, "interrupted run requeued");
                true
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "could not requeue interrupted run");
                false
            }
        }
    }

    /// Cancel a task that has not reached a terminal state.
    ///
    /// Returns the status the task was in before this call. Cancelling a task
    /// that is already terminal is a no-op.
    pub fn cancel(&self, task_id: Uuid) -> SchedulerResult<TaskStatus> {
        let mut state = self.state.lock();
        let current = state
            .tasks
            .get(&task_id)
            .map(|t| t.status)
            .ok_or(SchedulerError::TaskNotFound(task_id))?;
        if current.is_terminal() {
            return Ok(current);
        }
        state.apply(task_id, Some(current), TaskStatus::Cancelled, TaskUpdate::default())?;
        Ok(current)
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        self.state.lock().tasks.get(&task_id).cloned()
    }

    /// Tasks in submission order, optionally restricted to one status.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.state.lock();
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        drop(state);
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    pub fn counts(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats::default();
        for task in state.tasks.values() {
            stats.record(task.status);
        }
        stats
    }

    /// Drop terminal tasks completed before `older_than`. Returns how many.
    pub fn purge_terminal(&self, older_than: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, t| !(t.is_terminal() && t.completed_at.is_some_and(|at| at < older_than)));
        before - state.tasks.len()
    }

    /// True when no task is pending, assigned or running.
    pub fn all_settled(&self) -> bool {
        self.state.lock().tasks.values().all(Task::is_terminal)
    }

    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission(tag: &str) -> TaskSubmission {
        TaskSubmission::new(json!({"tag": tag}), [tag])
    }

    #[test]
    fn test_enqueue_validates() {
        let queue = TaskQueue::new(3);
        assert_eq!(
            queue.enqueue(TaskSubmission::new(json!(null), Vec::<String>::new())),
            Err(ValidationError::EmptyTags)
        );
        assert_eq!(
            queue.enqueue(submission("search").with_max_attempts(0)),
            Err(ValidationError::InvalidMaxAttempts(0))
        );
        assert!(queue.is_empty());

        let id = queue.enqueue(submission("search")).unwrap();
        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_attempts, 3);
        assert_eq!(task.attempt_count, 0);
    }

    #[test]
    fn test_next_pending_orders_by_priority_then_fifo() {
        let queue = TaskQueue::new(3);
        let low = queue
            .enqueue(submission("a").with_priority(TaskPriority::Low))
            .unwrap();
        let first = queue.enqueue(submission("a")).unwrap();
        let second = queue.enqueue(submission("a")).unwrap();
        let high = queue
            .enqueue(submission("a").with_priority(TaskPriority::High))
            .unwrap();

        let mut order = Vec::new();
        while let Some(task) = queue.next_pending(|t| !order.contains(&t.id)) {
            order.push(task.id);
        }
        assert_eq!(order, vec![high, first, second, low]);
    }

    #[test]
    fn test_next_pending_predicate_skips() {
        let queue = TaskQueue::new(3);
        queue.enqueue(submission("blocked")).unwrap();
        let open = queue.enqueue(submission("open")).unwrap();

        let task = queue
            .next_pending(|t| !t.required_tags.contains("blocked"))
            .unwrap();
        assert_eq!(task.id, open);
    }

    #[test]
    fn test_transition_checks_expected_state() {
        let queue = TaskQueue::new(3);
        let id = queue.enqueue(submission("a")).unwrap();

        let err = queue
            .transition(id, TaskStatus::Assigned, TaskStatus::Running, TaskUpdate::default())
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidTransition { actual: TaskStatus::Pending, .. }
        ));

        queue
            .transition(id, TaskStatus::Pending, TaskStatus::Assigned, TaskUpdate::assign("x"))
            .unwrap();
        assert!(queue.next_pending(|_| true).is_none());

        let missing = Uuid::new_v4();
        assert!(matches!(
            queue.transition(missing, TaskStatus::Pending, TaskStatus::Assigned, TaskUpdate::assign("x")),
            Err(SchedulerError::TaskNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn test_only_one_concurrent_transition_wins() {
        let queue = std::sync::Arc::new(TaskQueue::new(3));
        let id = queue.enqueue(submission("a")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = std::sync::Arc::clone(&queue);
                std::thread::spawn(move || {
                    queue
                        .transition(
                            id,
                            TaskStatus::Pending,
                            TaskStatus::Assigned,
                            TaskUpdate::assign(format!("agent-{i}")),
                        )
                        .is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_retry_keeps_seniority() {
        let queue = TaskQueue::new(3);
        let senior = queue.enqueue(submission("a")).unwrap();
        let junior = queue.enqueue(submission("a")).unwrap();

        queue
            .transition(senior, TaskStatus::Pending, TaskStatus::Assigned, TaskUpdate::assign("x"))
            .unwrap();
        queue
            .transition(senior, TaskStatus::Assigned, TaskStatus::Running, TaskUpdate::default())
            .unwrap();
        let task = queue
            .transition(senior, TaskStatus::Running, TaskStatus::Pending, TaskUpdate::failure("boom"))
            .unwrap();
        assert_eq!(task.attempt_count, 1);
        assert!(task.assigned_agent_id.is_none());

        assert_eq!(queue.next_pending(|_| true).unwrap().id, senior);
        assert_ne!(senior, junior);
    }

    #[test]
    fn test_cancel_and_counts() {
        let queue = TaskQueue::new(3);
        let pending = queue.enqueue(submission("a")).unwrap();
        let running = queue.enqueue(submission("a")).unwrap();
        queue
            .transition(running, TaskStatus::Pending, TaskStatus::Assigned, TaskUpdate::assign("x"))
            .unwrap();
        queue
            .transition(running, TaskStatus::Assigned, TaskStatus::Running, TaskUpdate::default())
            .unwrap();

        assert_eq!(queue.cancel(pending).unwrap(), TaskStatus::Pending);
        assert_eq!(queue.cancel(pending).unwrap(), TaskStatus::Cancelled);
        assert!(queue.next_pending(|_| true).is_none());

        let stats = queue.counts();
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.total(), 2);
        assert!(!queue.all_settled());

        assert_eq!(queue.cancel(running).unwrap(), TaskStatus::Running);
        assert!(queue.all_settled());
        assert_eq!(queue.list(Some(TaskStatus::Cancelled)).len(), 2);
    }

    #[test]
    fn test_purge_terminal() {
        let queue = TaskQueue::new(3);
        let done = queue.enqueue(submission("a")).unwrap();
        let live = queue.enqueue(submission("a")).unwrap();
        queue.cancel(done).unwrap();

        assert_eq!(queue.purge_terminal(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(queue.purge_terminal(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(queue.get(done).is_none());
        assert!(queue.get(live).is_some());
    }

    #[test]
    fn test_fifo_ignores_wall_clock() {
        let queue = TaskQueue::new(3);
        let first = queue.enqueue(submission("a")).unwrap();
        let second = queue.enqueue(submission("a")).unwrap();

        // Clock stepped backwards between the two submissions.
        {
            let mut state = queue.state.lock();
            let earlier = state.tasks[&first].created_at - chrono::Duration::hours(1);
            state.tasks.get_mut(&second).unwrap().created_at = earlier;
        }

        assert_eq!(queue.next_pending(|_| true).unwrap().id, first);
    }

    #[test]
    fn test_next_pending_after_resumes_past_cursor() {
        let queue = TaskQueue::new(3);
        let a = queue.enqueue(submission("a")).unwrap();
        let b = queue.enqueue(submission("b")).unwrap();
        let c = queue
            .enqueue(submission("c").with_priority(TaskPriority::High))
            .unwrap();

        let head = queue.next_pending_after(None, |_| true).unwrap();
        assert_eq!(head.id, c);
        let next = queue.next_pending_after(Some(&head), |_| true).unwrap();
        assert_eq!(next.id, a);
        let last = queue.next_pending_after(Some(&next), |_| true).unwrap();
        assert_eq!(last.id, b);
        assert!(queue.next_pending_after(Some(&last), |_| true).is_none());
    }

    #[test]
    fn test_requeue_interrupted_keeps_attempts() {
        let queue = TaskQueue::new(3);
        let id = queue.enqueue(submission("a")).unwrap();
        assert!(!queue.requeue_interrupted(id));

        queue
            .transition(id, TaskStatus::Pending, TaskStatus::Assigned, TaskUpdate::assign("x"))
            .unwrap();
        queue
            .transition(id, TaskStatus::Assigned, TaskStatus::Running, TaskUpdate::default())
            .unwrap();
        assert!(queue.requeue_interrupted(id));

        let task = queue.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt_count, 0);
        assert!(task.assigned_agent_id.is_none());
        assert_eq!(queue.next_pending(|_| true).unwrap().id, id);

        queue
            .transition(id, TaskStatus::Pending, TaskStatus::Assigned, TaskUpdate::assign("x"))
            .unwrap();
        assert!(queue.requeue_interrupted(id));
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Pending);

        queue.cancel(id).unwrap();
        assert!(!queue.requeue_interrupted(id));
        assert!(!queue.requeue_interrupted(Uuid::new_v4()));
    }
}
