//! Execution reporting and result storage.
//!
//! The distributor is the surface worker-side adapters call to report
//! lifecycle progress: `start_task` when execution begins, `complete_task`
//! when it ends. On failure it consults the task's retry policy and either
//! requeues the task (handing the computed backoff delay to the caller) or
//! moves it to the dead-letter queue. Transient failures are outcomes, not
//! errors: only structural problems (unknown ids, storage failures)
//! propagate.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use crate::events::{Bus, QueueEvent};
use crate::models::{Task, TaskResult, TaskStatus};
use crate::queue::{TaskOperationError, TaskQueue};
use crate::registry::WorkerRegistry;
use crate::storage::StorageError;

/// What happened when a task's execution was reported finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The task completed successfully; its result is stored.
    Completed,
    /// The attempt failed but retry budget remains. The task is back in
    /// `pending`; the embedding system's scheduler should dispatch the
    /// retry after `delay` (the queue never sleeps on it).
    RetryScheduled {
        /// Attempt number just recorded (1-based).
        attempt: u32,
        /// Computed backoff delay.
        delay: Duration,
    },
    /// Retries are exhausted; the task is permanently failed and recorded
    /// in the dead-letter queue.
    DeadLettered {
        /// Id of the dead-letter entry.
        entry_id: i64,
    },
}

/// Records execution outcomes against the queue.
///
/// Cheap to clone; shares the queue, registry and event bus handles.
#[derive(Debug, Clone)]
pub struct Distributor {
    queue: TaskQueue,
    registry: WorkerRegistry,
    bus: Bus,
}

impl Distributor {
    /// Creates a distributor over the given queue and registry, publishing
    /// lifecycle events on `bus`.
    #[must_use]
    pub const fn new(queue: TaskQueue, registry: WorkerRegistry, bus: Bus) -> Self {
        Self {
            queue,
            registry,
            bus,
        }
    }

    /// Returns the queue this distributor reports against.
    #[must_use]
    pub const fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Reports that execution of an assigned task has begun.
    ///
    /// Transitions `assigned -> running` and records the start time.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::InvalidTransition`] - task is not `Assigned`
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn start_task(&self, task_id: Uuid) -> Result<Task, TaskOperationError> {
        let current = self
            .queue
            .get(task_id)
            .await?
            .ok_or(TaskOperationError::NotFound { task_id })?;

        if current.status != TaskStatus::Assigned {
            return Err(TaskOperationError::invalid_transition(
                task_id,
                vec![TaskStatus::Assigned],
                current.status,
            ));
        }

        let task = self
            .queue
            .update_status(task_id, TaskStatus::Running, None)
            .await?;
        tracing::info!(task_id = %task_id, "task started");
        Ok(task)
    }

    /// Reports the end of a task's execution.
    ///
    /// On success, stores the result and transitions to `completed`. On
    /// failure, records the attempt and either requeues the task with a
    /// computed backoff delay or, once retries are exhausted, moves it to
    /// the dead-letter queue. Either way the caller gets an explicit
    /// [`CompletionOutcome`], never an error for an expected failure path.
    ///
    /// # Arguments
    ///
    /// * `task_id` - The task whose execution finished
    /// * `success` - Whether the worker succeeded
    /// * `result_or_error` - Result payload on success, error description on
    ///   failure (stringified into `last_error`)
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::RetryExhausted`] - the task was already
    ///   dead-lettered; no further attempt happens automatically
    /// * [`TaskOperationError::InvalidTransition`] - task is not running
    ///   (or timed out, which completes through the recovery path)
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        success: bool,
        result_or_error: Value,
    ) -> Result<CompletionOutcome, TaskOperationError> {
        let task = self
            .queue
            .get(task_id)
            .await?
            .ok_or(TaskOperationError::NotFound { task_id })?;

        if task.status == TaskStatus::Failed && !task.can_retry() {
            return Err(TaskOperationError::RetryExhausted {
                task_id,
                attempts: task.attempt_count,
            });
        }
        if !matches!(task.status, TaskStatus::Running | TaskStatus::Timeout) {
            return Err(TaskOperationError::invalid_transition(
                task_id,
                vec![TaskStatus::Running, TaskStatus::Timeout],
                task.status,
            ));
        }

        let worker_id = task.assigned_worker.clone();
        let outcome = if success {
            self.record_success(&task, result_or_error).await?
        } else {
            let error = stringify_error(&result_or_error);
            self.retry_or_dead_letter(&task, &error, None).await?
        };

        if let Some(worker_id) = worker_id {
            self.registry.task_finished(&worker_id, success);
        }
        Ok(outcome)
    }

    /// Stores the result and marks the task completed.
    async fn record_success(
        &self,
        task: &Task,
        data: Value,
    ) -> Result<CompletionOutcome, TaskOperationError> {
        let result_id = Uuid::new_v4();
        let now = Utc::now();
        let serialized = serde_json::to_string(&data)?;

        let mut tx = self.queue.store().begin().await?;
        sqlx::query("INSERT INTO results (task_id, data, stored_at) VALUES (?, ?, ?)")
            .bind(task.id.to_string())
            .bind(&serialized)
            .bind(now.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE tasks SET status = 'completed', result_id = ?, completed_at = ? WHERE id = ?",
        )
        .bind(result_id.to_string())
        .bind(now.timestamp_millis())
        .bind(task.id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await.map_err(StorageError::from)?;

        counter!("foreman.tasks.completed", "task_type" => task.task_type.clone()).increment(1);
        tracing::info!(task_id = %task.id, "task completed");
        self.bus.publish(QueueEvent::TaskCompleted { task_id: task.id });
        Ok(CompletionOutcome::Completed)
    }

    /// Records a failed attempt and decides between requeue and dead-letter.
    ///
    /// Also used by the coordinator's timeout recovery, which is why it is
    /// exposed on the distributor rather than folded into `complete_task`.
    pub(crate) async fn retry_or_dead_letter(
        &self,
        task: &Task,
        error: &str,
        stack: Option<&str>,
    ) -> Result<CompletionOutcome, TaskOperationError> {
        let attempt = self.queue.increment_attempt(task.id).await?;

        if attempt < task.max_retries {
            // Delay for retry n is base * factor^(n-1): the first retry
            // waits the base delay.
            let delay = task.retry_policy.calculate_delay(attempt.saturating_sub(1));
            self.queue
                .update_status(task.id, TaskStatus::Failed, Some(error))
                .await?;
            self.queue.requeue(task.id).await?;

            counter!("foreman.tasks.retried", "task_type" => task.task_type.clone()).increment(1);
            tracing::info!(
                task_id = %task.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "task requeued for retry"
            );
            self.bus.publish(QueueEvent::TaskRetryScheduled {
                task_id: task.id,
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            Ok(CompletionOutcome::RetryScheduled { attempt, delay })
        } else {
            let entry_id = self.queue.move_to_dead_letter(task.id, error, stack).await?;
            self.bus.publish(QueueEvent::TaskDeadLettered {
                task_id: task.id,
                entry_id,
            });
            Ok(CompletionOutcome::DeadLettered { entry_id })
        }
    }

    /// Returns the stored result of a completed task, or `None` if no
    /// result has been stored.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get_result(&self, task_id: Uuid) -> Result<Option<TaskResult>, TaskOperationError> {
        let row = sqlx::query("SELECT task_id, data, stored_at FROM results WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(self.queue.store().pool())
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let data_raw: String = row.try_get("data").map_err(StorageError::from)?;
        let stored_ms: i64 = row.try_get("stored_at").map_err(StorageError::from)?;
        let stored_at = chrono::DateTime::from_timestamp_millis(stored_ms).ok_or_else(|| {
            StorageError::Corrupt {
                key: format!("results.{task_id}"),
                detail: format!("timestamp out of range: {stored_ms}"),
            }
        })?;

        Ok(Some(TaskResult {
            task_id,
            data: serde_json::from_str(&data_raw).map_err(StorageError::from)?,
            stored_at,
        }))
    }
}

/// Renders the failure payload of `complete_task` into error text.
fn stringify_error(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
