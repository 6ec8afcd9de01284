//! Task domain model.
//!
//! Tasks are units of work that require a set of capability tags and are
//! executed by exactly one agent at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{SchedulerError, SchedulerResult, ValidationError};

/// Status of a task in the scheduling pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be routed to an agent
    Pending,
    /// Routed; a slot on the agent is reserved but execution has not started
    Assigned,
    /// The agent is executing the task
    Running,
    /// Execution completed successfully
    Succeeded,
    /// Attempts exhausted
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether an agent slot is held while in this state.
    pub fn holds_agent(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    /// Valid transitions from this status.
    ///
    /// `Pending -> Running` is absent: every run passes through `Assigned`,
    /// which is where the agent slot gets reserved. `Assigned -> Pending` and
    /// `Running -> Pending` without a recorded failure return a task whose run
    /// was interrupted.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Assigned, Self::Cancelled],
            Self::Assigned => &[Self::Running, Self::Pending, Self::Cancelled],
            Self::Running => &[Self::Succeeded, Self::Pending, Self::Failed, Self::Cancelled],
            Self::Succeeded | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority level for tasks. Higher priorities are routed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Numeric ordinal of this priority (1 = low, 4 = critical).
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Convert an ordinal into a priority.
    pub fn from_ordinal(value: u8) -> Result<Self, ValidationError> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Normal),
            3 => Ok(Self::High),
            4 => Ok(Self::Critical),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }

    /// Parse a priority from its name or ordinal.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if let Ok(ordinal) = trimmed.parse::<u8>() {
            return Self::from_ordinal(ordinal);
        }
        match trimmed.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ValidationError::InvalidPriority(s.to_string())),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize and validate a set of capability tags.
pub fn normalize_tags<I, S>(tags: I) -> Result<BTreeSet<String>, ValidationError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = BTreeSet::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if tag.is_empty() {
            return Err(ValidationError::BlankTag);
        }
        normalized.insert(tag.to_string());
    }
    if normalized.is_empty() {
        return Err(ValidationError::EmptyTags);
    }
    Ok(normalized)
}

/// A request to create a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSubmission {
    /// Opaque payload handed to the agent
    pub payload: Value,
    /// Capability tags an agent must cover
    pub required_tags: Vec<String>,
    /// Routing priority
    pub priority: TaskPriority,
    /// Per-task attempt limit; the configured default applies when unset
    pub max_attempts: Option<u32>,
}

impl TaskSubmission {
    pub fn new<I, S>(payload: Value, required_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            payload,
            required_tags: required_tags.into_iter().map(Into::into).collect(),
            priority: TaskPriority::default(),
            max_attempts: None,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Extra fields applied together with a state transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    /// Agent to record on `Pending -> Assigned`
    pub assigned_agent_id: Option<String>,
    /// Count the run that just ended as a failed attempt
    pub record_failure: bool,
    /// Error message of the failed attempt
    pub last_error: Option<String>,
    /// Value returned by the agent on success
    pub result: Option<Value>,
    /// Earliest instant a retried task may be routed again
    pub not_before: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn assign(agent_id: impl Into<String>) -> Self {
        Self {
            assigned_agent_id: Some(agent_id.into()),
            ..Default::default()
        }
    }

    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            record_failure: true,
            last_error: Some(error.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }
}

/// A unit of work tracked by the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Opaque payload handed to the agent
    pub payload: Value,
    /// Capability tags an agent must cover
    pub required_tags: BTreeSet<String>,
    /// Routing priority
    pub priority: TaskPriority,
    /// Current status
    pub status: TaskStatus,
    /// Agent holding this task (only while assigned or running)
    pub assigned_agent_id: Option<String>,
    /// Failed attempts so far
    pub attempt_count: u32,
    /// Attempts allowed before the task fails permanently
    pub max_attempts: u32,
    /// Submission order, breaks FIFO ties between equal timestamps
    pub sequence: u64,
    /// When submitted
    pub created_at: DateTime<Utc>,
    /// When last transitioned
    pub updated_at: DateTime<Utc>,
    /// When the latest run started
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// Retry backoff: not routable before this instant
    pub not_before: Option<DateTime<Utc>>,
    /// Error of the most recent failed attempt
    pub last_error: Option<String>,
    /// Agent output on success
    pub result: Option<Value>,
}

impl Task {
    /// Create a pending task. Inputs are expected to be validated already.
    pub fn new(
        payload: Value,
        required_tags: BTreeSet<String>,
        priority: TaskPriority,
        max_attempts: u32,
        sequence: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payload,
            required_tags,
            priority,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            attempt_count: 0,
            max_attempts,
            sequence,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            not_before: None,
            last_error: None,
            result: None,
        }
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the task is pending and out of its retry backoff window.
    pub fn is_routable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.not_before.map_or(true, |at| at <= now)
    }

    /// Whether one more failure would exhaust the attempt budget.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt_count + 1 >= self.max_attempts
    }

    /// Apply a transition together with its extra fields.
    ///
    /// The caller is responsible for checking the expected source state; this
    /// only validates the edge itself and keeps the record consistent.
    pub fn transition_to(&mut self, new_status: TaskStatus, update: TaskUpdate) -> SchedulerResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(SchedulerError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: new_status,
                actual: self.status,
            });
        }

        let attempts = if update.record_failure {
            self.attempt_count + 1
        } else {
            self.attempt_count
        };
        if attempts > self.max_attempts
            || (new_status == TaskStatus::Pending && attempts >= self.max_attempts)
        {
            return Err(SchedulerError::AttemptsExhausted {
                task_id: self.id,
                max_attempts: self.max_attempts,
            });
        }

        match new_status {
            TaskStatus::Assigned => {
                let agent_id = update
                    .assigned_agent_id
                    .ok_or(SchedulerError::MissingAssignment(new_status))?;
                self.assigned_agent_id = Some(agent_id);
                self.not_before = None;
            }
            TaskStatus::Running => {
                self.started_at = Some(Utc::now());
            }
            TaskStatus::Pending => {
                self.assigned_agent_id = None;
                self.not_before = update.not_before;
            }
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.assigned_agent_id = None;
                self.not_before = None;
                self.completed_at = Some(Utc::now());
            }
        }

        self.attempt_count = attempts;
        if update.last_error.is_some() {
            self.last_error = update.last_error;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        self.status = new_status;
        self.updated_at = Utc::now();

        Ok(())
    }
}

/// Read-only view of a task for monitoring collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub state: TaskStatus,
    pub priority: TaskPriority,
    pub required_tags: BTreeSet<String>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub assigned_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            state: task.status,
            priority: task.priority,
            required_tags: task.required_tags.clone(),
            attempt_count: task.attempt_count,
            max_attempts: task.max_attempts,
            assigned_agent_id: task.assigned_agent_id.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            last_error: task.last_error.clone(),
            result: task.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(max_attempts: u32) -> Task {
        Task::new(
            json!({"query": "rust"}),
            normalize_tags(["search"]).unwrap(),
            TaskPriority::Normal,
            max_attempts,
            0,
        )
    }

    #[test]
    fn test_task_status_display() {
        assert_eq!(TaskStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_pending_cannot_jump_to_running() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Assigned));
        assert!(TaskStatus::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!(TaskPriority::parse("high").unwrap(), TaskPriority::High);
        assert_eq!(TaskPriority::parse(" 4 ").unwrap(), TaskPriority::Critical);
        assert!(matches!(
            TaskPriority::parse("urgent"),
            Err(ValidationError::InvalidPriority(_))
        ));
        assert!(TaskPriority::from_ordinal(0).is_err());
        assert!(TaskPriority::Critical > TaskPriority::Low);
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags([" search ", "search", "revenue"]).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("search"));
        assert_eq!(normalize_tags(Vec::<String>::new()), Err(ValidationError::EmptyTags));
        assert_eq!(normalize_tags(["  "]), Err(ValidationError::BlankTag));
    }

    #[test]
    fn test_assignment_requires_agent() {
        let mut task = task(3);
        let err = task
            .transition_to(TaskStatus::Assigned, TaskUpdate::default())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::MissingAssignment(_)));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_full_lifecycle_clears_agent() {
        let mut task = task(3);
        task.transition_to(TaskStatus::Assigned, TaskUpdate::assign("a"))
            .unwrap();
        assert_eq!(task.assigned_agent_id.as_deref(), Some("a"));

        task.transition_to(TaskStatus::Running, TaskUpdate::default())
            .unwrap();
        assert!(task.started_at.is_some());
        assert_eq!(task.assigned_agent_id.as_deref(), Some("a"));

        task.transition_to(TaskStatus::Succeeded, TaskUpdate::success(json!("ok")))
            .unwrap();
        assert!(task.is_terminal());
        assert!(task.assigned_agent_id.is_none());
        assert!(task.completed_at.is_some());
        assert_eq!(task.result, Some(json!("ok")));
        assert_eq!(task.attempt_count, 0);
    }

    #[test]
    fn test_retry_cannot_requeue_on_last_attempt() {
        let mut task = task(1);
        task.transition_to(TaskStatus::Assigned, TaskUpdate::assign("a"))
            .unwrap();
        task.transition_to(TaskStatus::Running, TaskUpdate::default())
            .unwrap();

        let err = task
            .transition_to(TaskStatus::Pending, TaskUpdate::failure("boom"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AttemptsExhausted { .. }));

        task.transition_to(TaskStatus::Failed, TaskUpdate::failure("boom"))
            .unwrap();
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_routable_respects_backoff() {
        let mut task = task(3);
        let now = Utc::now();
        assert!(task.is_routable_at(now));

        task.not_before = Some(now + chrono::Duration::seconds(5));
        assert!(!task.is_routable_at(now));
        assert!(task.is_routable_at(now + chrono::Duration::seconds(6)));
    }
}
