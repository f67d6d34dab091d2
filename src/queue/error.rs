//! Error types for task queue operations.

use thiserror::Error;
use uuid::Uuid;

use crate::models::TaskStatus;
use crate::storage::StorageError;

/// Errors that can occur during task operations.
///
/// Expected failure paths (a retryable execution failure, a timeout) are
/// never expressed through this type; they are result values consumed by
/// the retry logic. These errors are structural: unknown ids, transitions
/// the state machine forbids, storage failures.
#[derive(Debug, Error)]
pub enum TaskOperationError {
    /// The referenced task does not exist.
    #[error("Task not found: {task_id}")]
    NotFound {
        /// The id that matched no task.
        task_id: Uuid,
    },

    /// The referenced worker is not registered.
    #[error("Worker not found: {worker_id}")]
    WorkerNotFound {
        /// The id that matched no worker.
        worker_id: String,
    },

    /// The referenced dead-letter entry does not exist.
    #[error("Dead-letter entry not found: {entry_id}")]
    DeadLetterNotFound {
        /// The id that matched no entry.
        entry_id: i64,
    },

    /// The task is not in a status this operation accepts.
    #[error("Invalid transition for task {task_id}: expected {expected:?}, found {found:?}")]
    InvalidTransition {
        /// The task whose transition was rejected.
        task_id: Uuid,
        /// The status(es) the operation requires.
        expected: Vec<TaskStatus>,
        /// The status actually found.
        found: TaskStatus,
    },

    /// The task has exhausted its retries and moved to the dead-letter
    /// queue; no further attempt happens automatically.
    #[error("Retries exhausted for task {task_id} after {attempts} attempts")]
    RetryExhausted {
        /// The dead-lettered task.
        task_id: Uuid,
        /// Attempts recorded before exhaustion.
        attempts: u32,
    },

    /// A storage error occurred. Always propagated, never retried here.
    #[error("{0}")]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for TaskOperationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for TaskOperationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::from(err))
    }
}

impl TaskOperationError {
    /// Creates a `NotFound` error from a task id.
    #[must_use]
    pub const fn not_found(task_id: Uuid) -> Self {
        Self::NotFound { task_id }
    }

    /// Creates an `InvalidTransition` error.
    #[must_use]
    pub fn invalid_transition(task_id: Uuid, expected: Vec<TaskStatus>, found: TaskStatus) -> Self {
        Self::InvalidTransition {
            task_id,
            expected,
            found,
        }
    }
}
