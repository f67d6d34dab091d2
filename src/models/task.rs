use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::retry::RetryPolicy;

/// Represents the status of a task in the queue.
///
/// Tasks progress through states:
/// `Pending` -> `Assigned` -> `Running` -> `Completed`/`Failed`/`Timeout`/`Cancelled`.
/// `Failed` and `Timeout` tasks may return to `Pending` via an explicit requeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to be matched to a worker.
    Pending,
    /// Task has been bound to a worker but execution has not been reported yet.
    Assigned,
    /// Worker has reported that execution started.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task failed; permanent once retries are exhausted.
    Failed,
    /// Task exceeded its execution timeout.
    Timeout,
    /// Task was cancelled before reaching a terminal state.
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    /// All status variants, in lifecycle order.
    pub const ALL: &'static [Self] = &[
        Self::Pending,
        Self::Assigned,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Timeout,
        Self::Cancelled,
    ];

    /// Lowercase string used for persistence and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true for states the lifecycle never leaves on its own.
    ///
    /// `Failed` and `Timeout` are not terminal here: both can be requeued
    /// until retries are exhausted and the task moves to the dead-letter
    /// queue.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "assigned" => Ok(Self::Assigned),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "timeout" => Ok(Self::Timeout),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

/// Scheduling priority of a task.
///
/// Priority is a tie-break ahead of arrival time: the queue hands out
/// `Urgent` before `High` before `Normal` before `Low`, and within one band
/// strictly in creation order.
///
/// Variants are declared lowest-first so the derived `Ord` ranks
/// `Urgent` greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Background work, drained last.
    Low,
    /// Default priority.
    Normal,
    /// Ahead of normal traffic.
    High,
    /// Jumps every other band.
    Urgent,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    /// Numeric rank used for persistence and ordering (higher = sooner).
    #[must_use]
    pub const fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }

    /// Inverse of [`rank`](Self::rank); unknown ranks map to `Normal`.
    #[must_use]
    pub const fn from_rank(rank: i64) -> Self {
        match rank {
            0 => Self::Low,
            2 => Self::High,
            3 => Self::Urgent,
            _ => Self::Normal,
        }
    }
}

const fn default_timeout_ms() -> u64 {
    300_000
}

const fn default_max_retries() -> u32 {
    3
}

/// A task in the coordination queue.
///
/// The payload is opaque: the queue stores and returns it but never
/// interprets it. Use [`TaskSubmission::builder`] to construct submissions
/// with custom configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at submission and never reused.
    pub id: Uuid,

    /// Caller-defined classification (e.g. `send_email`, `build_index`).
    pub task_type: String,

    /// Opaque input data.
    pub payload: Value,

    /// Scheduling priority.
    #[serde(default)]
    pub priority: TaskPriority,

    /// Current lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,

    /// Maximum time in milliseconds the task may run once started.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of retry attempts before dead-lettering.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Number of execution attempts recorded so far.
    #[serde(default)]
    pub attempt_count: u32,

    /// Delay parameters for retry backoff.
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Capabilities a worker must declare to be eligible.
    /// Empty means any worker matches.
    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// Advisory preferred-worker hint; never enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,

    /// Worker currently bound to the task, if any.
    pub assigned_worker: Option<String>,

    /// Every worker that was ever assigned this task, in order.
    /// Captured into the dead-letter entry for diagnostics.
    #[serde(default)]
    pub attempted_workers: Vec<String>,

    /// Parent task for sub-task chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,

    /// Opaque caller metadata, carried through retries and dead-letter
    /// round-trips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,

    /// Id of the stored result, set on successful completion.
    pub result_id: Option<Uuid>,

    /// Timestamp when the task was submitted.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the current assignment.
    pub assigned_at: Option<DateTime<Utc>>,

    /// Timestamp when execution was reported started.
    pub started_at: Option<DateTime<Utc>>,

    /// Timestamp when the task reached a terminal or failed state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a pending task from a submission at the given time.
    #[must_use]
    pub fn from_submission(submission: TaskSubmission, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: submission.task_type,
            payload: submission.payload,
            priority: submission.priority.unwrap_or_default(),
            status: TaskStatus::Pending,
            timeout_ms: submission.timeout_ms.unwrap_or_else(default_timeout_ms),
            max_retries: submission.max_retries.unwrap_or_else(default_max_retries),
            attempt_count: 0,
            retry_policy: submission.retry_policy.unwrap_or_default(),
            required_capabilities: submission.required_capabilities,
            affinity: submission.affinity,
            assigned_worker: None,
            attempted_workers: Vec::new(),
            parent_task_id: submission.parent_task_id,
            metadata: submission.metadata,
            last_error: None,
            result_id: None,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns true if the task has retry budget left.
    ///
    /// The decision is made against the attempt count *after* the failed
    /// attempt has been recorded: `max_retries = 3` allows three failed
    /// attempts before the task is dead-lettered.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.attempt_count < self.max_retries
    }

    /// Returns true if a running task has exceeded its timeout at `now`.
    #[must_use]
    pub fn is_timed_out_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        let Some(started) = self.started_at else {
            return false;
        };
        let elapsed = now.signed_duration_since(started).num_milliseconds();
        elapsed >= 0 && elapsed as u64 >= self.timeout_ms
    }
}

/// A submission describing a task to enqueue.
///
/// Only `task_type` and `payload` are required; everything else falls back
/// to queue defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Caller-defined classification.
    pub task_type: String,
    /// Opaque input data.
    pub payload: Value,
    /// Scheduling priority (default `Normal`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TaskPriority>,
    /// Capabilities a worker must declare (default: none).
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Retry delay parameters (default: 1000ms base, 60000ms cap, factor 2).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Maximum retry attempts (default 3).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Execution timeout in milliseconds (default 300000).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Advisory preferred-worker hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<String>,
    /// Parent task for sub-task chains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<Uuid>,
    /// Opaque caller metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TaskSubmission {
    /// Creates a submission with the required fields.
    #[must_use]
    pub fn new(task_type: impl Into<String>, payload: Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: None,
            required_capabilities: Vec::new(),
            retry_policy: None,
            max_retries: None,
            timeout_ms: None,
            affinity: None,
            parent_task_id: None,
            metadata: None,
        }
    }

    /// Creates a builder for fluent configuration.
    #[must_use]
    pub fn builder(task_type: impl Into<String>, payload: Value) -> TaskSubmissionBuilder {
        TaskSubmissionBuilder {
            submission: Self::new(task_type, payload),
        }
    }
}

/// Builder for [`TaskSubmission`].
pub struct TaskSubmissionBuilder {
    submission: TaskSubmission,
}

impl TaskSubmissionBuilder {
    /// Sets the scheduling priority.
    #[must_use]
    pub const fn priority(mut self, priority: TaskPriority) -> Self {
        self.submission.priority = Some(priority);
        self
    }

    /// Sets the required capability set.
    #[must_use]
    pub fn required_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.submission.required_capabilities =
            capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the retry delay parameters.
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.submission.retry_policy = Some(policy);
        self
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.submission.max_retries = Some(max_retries);
        self
    }

    /// Sets the execution timeout in milliseconds.
    #[must_use]
    pub const fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.submission.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the advisory preferred-worker hint.
    #[must_use]
    pub fn affinity(mut self, worker_id: impl Into<String>) -> Self {
        self.submission.affinity = Some(worker_id.into());
        self
    }

    /// Sets the parent task id.
    #[must_use]
    pub const fn parent_task_id(mut self, parent: Uuid) -> Self {
        self.submission.parent_task_id = Some(parent);
        self
    }

    /// Sets opaque caller metadata.
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.submission.metadata = Some(metadata);
        self
    }

    /// Builds the submission.
    #[allow(clippy::missing_const_for_fn)]
    #[must_use]
    pub fn build(self) -> TaskSubmission {
        self.submission
    }
}

/// Stored output of a completed task. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: Uuid,
    /// Output data produced by the worker.
    pub data: Value,
    /// When the result was stored.
    pub stored_at: DateTime<Utc>,
}
