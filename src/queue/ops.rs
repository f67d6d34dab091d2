//! Task queue operations.

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::models::{DeadLetterEntry, RetryPolicy, Task, TaskPriority, TaskStatus, TaskSubmission};
use crate::storage::{StorageError, Store};

use super::error::TaskOperationError;
use super::stats::QueueStats;

/// How many pending rows a capability-filtered dequeue inspects per page.
const DEQUEUE_PAGE: i64 = 64;

const TASK_COLUMNS: &str = "id, task_type, payload, priority, status, timeout_ms, max_retries, \
     attempt_count, base_delay_ms, max_delay_ms, backoff_factor, required_capabilities, \
     affinity, assigned_worker, attempted_workers, parent_task_id, metadata, last_error, \
     result_id, created_at, assigned_at, started_at, completed_at";

/// The main queue interface for task operations.
///
/// Owns no state beyond a [`Store`] handle; cheap to clone. Every status
/// transition is a read-verify-write inside a transaction, so transitions
/// behave as compare-and-set: a task can never be assigned twice, and a
/// dead-letter insert lands together with its status flip or not at all.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    store: Store,
}

impl TaskQueue {
    /// Creates a queue over the given store.
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Enqueues a new task.
    ///
    /// Unspecified submission fields fall back to defaults: priority
    /// `Normal`, 3 retries, 1000ms base delay with a 60000ms cap and
    /// factor-2 backoff, 300000ms timeout. The task starts `Pending`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] if the insert fails.
    pub async fn enqueue(&self, submission: TaskSubmission) -> Result<Task, TaskOperationError> {
        let task = Task::from_submission(submission, Utc::now());
        insert_task(self.store.pool(), &task).await?;

        counter!("foreman.tasks.submitted", "task_type" => task.task_type.clone()).increment(1);
        tracing::debug!(task_id = %task.id, task_type = %task.task_type, "task enqueued");
        Ok(task)
    }

    /// Enqueues a batch of tasks atomically (all-or-nothing).
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] if any insert fails; in that
    /// case none of the batch is visible.
    pub async fn enqueue_batch(
        &self,
        submissions: Vec<TaskSubmission>,
    ) -> Result<Vec<Task>, TaskOperationError> {
        let now = Utc::now();
        let tasks: Vec<Task> = submissions
            .into_iter()
            .map(|s| Task::from_submission(s, now))
            .collect();

        let mut tx = self.store.begin().await?;
        for task in &tasks {
            insert_task(&mut *tx, task).await?;
        }
        tx.commit().await.map_err(StorageError::from)?;

        for task in &tasks {
            counter!("foreman.tasks.submitted", "task_type" => task.task_type.clone())
                .increment(1);
        }
        tracing::debug!(count = tasks.len(), "task batch enqueued");
        Ok(tasks)
    }

    /// Gets a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get(&self, task_id: Uuid) -> Result<Option<Task>, TaskOperationError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(task_id.to_string())
            .fetch_optional(self.store.pool())
            .await?;
        row.as_ref().map(task_from_row).transpose().map_err(Into::into)
    }

    /// Returns the next dispatchable task without claiming it.
    ///
    /// Ordering: priority descending (urgent first), then creation time
    /// ascending, then insertion order: strict FIFO within a priority band.
    /// The task stays `Pending`; binding it to a worker is [`assign`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    ///
    /// [`assign`]: Self::assign
    pub async fn dequeue(&self) -> Result<Option<Task>, TaskOperationError> {
        self.dequeue_filtered(None).await
    }

    /// Like [`dequeue`](Self::dequeue), restricted to tasks the given
    /// capability set can service.
    ///
    /// A task is eligible iff every one of its `required_capabilities`
    /// appears in `capabilities` (exact subset); a task with no requirements
    /// matches any caller. Returns `None` without mutating anything when no
    /// pending task matches.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn dequeue_with_capabilities(
        &self,
        capabilities: &[String],
    ) -> Result<Option<Task>, TaskOperationError> {
        self.dequeue_filtered(Some(capabilities)).await
    }

    async fn dequeue_filtered(
        &self,
        capabilities: Option<&[String]>,
    ) -> Result<Option<Task>, TaskOperationError> {
        let mut offset = 0_i64;
        loop {
            let rows = sqlx::query(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending' \
                 ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ? OFFSET ?"
            ))
            .bind(DEQUEUE_PAGE)
            .bind(offset)
            .fetch_all(self.store.pool())
            .await?;

            let page_len = rows.len();
            for row in &rows {
                let task = task_from_row(row)?;
                let eligible = match capabilities {
                    None => true,
                    Some(caps) => task
                        .required_capabilities
                        .iter()
                        .all(|req| caps.iter().any(|have| have == req)),
                };
                if eligible {
                    return Ok(Some(task));
                }
            }

            if (page_len as i64) < DEQUEUE_PAGE {
                return Ok(None);
            }
            offset += DEQUEUE_PAGE;
        }
    }

    /// Binds a pending task to a worker.
    ///
    /// The transition `pending -> assigned` is a compare-and-set inside a
    /// transaction: concurrent callers cannot both assign the same task.
    /// Records the assignment time and appends the worker to the task's
    /// attempt trail.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::InvalidTransition`] - task is not `Pending`
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn assign(
        &self,
        task_id: Uuid,
        worker_id: &str,
    ) -> Result<Task, TaskOperationError> {
        let mut tx = self.store.begin().await?;
        let mut task = fetch_task(&mut tx, task_id).await?;

        if task.status != TaskStatus::Pending {
            return Err(TaskOperationError::invalid_transition(
                task_id,
                vec![TaskStatus::Pending],
                task.status,
            ));
        }

        let now = Utc::now();
        task.status = TaskStatus::Assigned;
        task.assigned_worker = Some(worker_id.to_string());
        task.assigned_at = Some(now);
        task.attempted_workers.push(worker_id.to_string());

        let attempted = serde_json::to_string(&task.attempted_workers)?;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'assigned', assigned_worker = ?, assigned_at = ?, \
             attempted_workers = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(now.timestamp_millis())
        .bind(&attempted)
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskOperationError::invalid_transition(
                task_id,
                vec![TaskStatus::Pending],
                task.status,
            ));
        }
        tx.commit().await.map_err(StorageError::from)?;

        counter!("foreman.tasks.assigned", "task_type" => task.task_type.clone()).increment(1);
        tracing::info!(task_id = %task_id, worker_id = %worker_id, "task assigned");
        Ok(task)
    }

    /// Transitions a task to `status`, timestamping automatically:
    /// `assigned` records the assignment time, `running` the start time,
    /// and any ending status the completion time. Attaches `error` text
    /// when provided.
    ///
    /// Terminal tasks (`completed`, `cancelled`) are immutable here; use
    /// [`requeue`](Self::requeue) for recovery paths.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::InvalidTransition`] - task already terminal
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Task, TaskOperationError> {
        let mut tx = self.store.begin().await?;
        let mut task = fetch_task(&mut tx, task_id).await?;

        if task.status.is_terminal() && status != task.status {
            return Err(TaskOperationError::invalid_transition(
                task_id,
                vec![
                    TaskStatus::Pending,
                    TaskStatus::Assigned,
                    TaskStatus::Running,
                    TaskStatus::Failed,
                    TaskStatus::Timeout,
                ],
                task.status,
            ));
        }

        let now = Utc::now();
        task.status = status;
        match status {
            TaskStatus::Assigned => task.assigned_at = Some(now),
            TaskStatus::Running => task.started_at = Some(now),
            TaskStatus::Completed
            | TaskStatus::Failed
            | TaskStatus::Timeout
            | TaskStatus::Cancelled => task.completed_at = Some(now),
            TaskStatus::Pending => {}
        }
        if let Some(message) = error {
            task.last_error = Some(message.to_string());
        }

        persist_transition(&mut tx, &task).await?;
        tx.commit().await.map_err(StorageError::from)?;

        tracing::debug!(task_id = %task_id, status = %status, "task status updated");
        Ok(task)
    }

    /// Increments and returns the task's attempt count.
    ///
    /// Callers record the attempt before deciding between requeue and
    /// dead-letter.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn increment_attempt(&self, task_id: Uuid) -> Result<u32, TaskOperationError> {
        let mut tx = self.store.begin().await?;

        let result = sqlx::query("UPDATE tasks SET attempt_count = attempt_count + 1 WHERE id = ?")
            .bind(task_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TaskOperationError::not_found(task_id));
        }

        let row = sqlx::query("SELECT attempt_count FROM tasks WHERE id = ?")
            .bind(task_id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let count: i64 = row.try_get("attempt_count").map_err(StorageError::from)?;
        tx.commit().await.map_err(StorageError::from)?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Returns a task to `pending`, clearing its assignment fields.
    ///
    /// Works from any current status; this is the recovery path for failed
    /// and timed-out tasks (and for assignments written against a worker
    /// that vanished mid-match).
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn requeue(&self, task_id: Uuid) -> Result<Task, TaskOperationError> {
        let mut tx = self.store.begin().await?;
        let mut task = fetch_task(&mut tx, task_id).await?;

        task.status = TaskStatus::Pending;
        task.assigned_worker = None;
        task.assigned_at = None;
        task.started_at = None;
        task.completed_at = None;

        sqlx::query(
            "UPDATE tasks SET status = 'pending', assigned_worker = NULL, assigned_at = NULL, \
             started_at = NULL, completed_at = NULL WHERE id = ?",
        )
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await.map_err(StorageError::from)?;

        counter!("foreman.tasks.requeued", "task_type" => task.task_type.clone()).increment(1);
        tracing::info!(task_id = %task_id, "task requeued");
        Ok(task)
    }

    /// Cancels a task.
    ///
    /// Safe to call at any point before a terminal state. Cancelling a
    /// running task does not interrupt the worker; workers honor
    /// cancellation cooperatively by polling task status.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::InvalidTransition`] - task already terminal
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn cancel(&self, task_id: Uuid) -> Result<Task, TaskOperationError> {
        let task = self
            .update_status(task_id, TaskStatus::Cancelled, None)
            .await?;
        counter!("foreman.tasks.cancelled", "task_type" => task.task_type.clone()).increment(1);
        Ok(task)
    }

    /// Moves a task to the dead-letter queue.
    ///
    /// One transaction inserts the dead-letter record (capturing the full
    /// attempt history) and marks the task permanently `failed`, together
    /// or not at all.
    ///
    /// # Arguments
    ///
    /// * `task_id` - The task to dead-letter
    /// * `error` - Final error message
    /// * `stack` - Stack trace accompanying the error, if the reporter had one
    ///
    /// # Returns
    ///
    /// The id of the new dead-letter entry.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn move_to_dead_letter(
        &self,
        task_id: Uuid,
        error: &str,
        stack: Option<&str>,
    ) -> Result<i64, TaskOperationError> {
        let mut tx = self.store.begin().await?;
        let task = fetch_task(&mut tx, task_id).await?;
        let now = Utc::now();

        let payload = serde_json::to_string(&task.payload)?;
        let metadata = task
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let attempted = serde_json::to_string(&task.attempted_workers)?;

        let insert = sqlx::query(
            "INSERT INTO dead_letters (task_id, task_type, payload, metadata, error, stack, \
             retry_count, final_status, attempted_workers, created_at, failed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task_id.to_string())
        .bind(&task.task_type)
        .bind(&payload)
        .bind(metadata)
        .bind(error)
        .bind(stack)
        .bind(i64::from(task.attempt_count))
        .bind(task.status.as_str())
        .bind(&attempted)
        .bind(task.created_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?;
        let entry_id = insert.last_insert_rowid();

        sqlx::query(
            "UPDATE tasks SET status = 'failed', last_error = ?, completed_at = ?, \
             assigned_worker = NULL WHERE id = ?",
        )
        .bind(error)
        .bind(now.timestamp_millis())
        .bind(task_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(StorageError::from)?;

        counter!("foreman.tasks.dead_lettered", "task_type" => task.task_type.clone())
            .increment(1);
        tracing::warn!(task_id = %task_id, entry_id, error = %error, "task moved to dead letter");
        Ok(entry_id)
    }

    /// Retries a dead-lettered task.
    ///
    /// One transaction creates a brand-new task (fresh id, attempt count 0)
    /// from the stored original type, payload and metadata, and deletes the
    /// dead-letter entry.
    ///
    /// # Returns
    ///
    /// The new task's id, or `None` if the entry no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn retry_dead_letter(
        &self,
        entry_id: i64,
    ) -> Result<Option<Uuid>, TaskOperationError> {
        let mut tx = self.store.begin().await?;

        let row = sqlx::query(
            "SELECT id, task_id, task_type, payload, metadata, error, stack, retry_count, \
             final_status, attempted_workers, created_at, failed_at \
             FROM dead_letters WHERE id = ?",
        )
        .bind(entry_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let entry = dead_letter_from_row(&row)?;

        let mut submission = TaskSubmission::new(entry.task_type.clone(), entry.payload.clone());
        submission.metadata = entry.metadata.clone();
        let task = Task::from_submission(submission, Utc::now());
        insert_task(&mut *tx, &task).await?;

        sqlx::query("DELETE FROM dead_letters WHERE id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await.map_err(StorageError::from)?;

        counter!("foreman.tasks.dead_letter_retried", "task_type" => task.task_type.clone())
            .increment(1);
        tracing::info!(entry_id, new_task_id = %task.id, "dead-letter entry retried");
        Ok(Some(task.id))
    }

    /// Gets a dead-letter entry by id.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::DeadLetterNotFound`] - no such entry
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn get_dead_letter(
        &self,
        entry_id: i64,
    ) -> Result<DeadLetterEntry, TaskOperationError> {
        let row = sqlx::query(
            "SELECT id, task_id, task_type, payload, metadata, error, stack, retry_count, \
             final_status, attempted_workers, created_at, failed_at \
             FROM dead_letters WHERE id = ?",
        )
        .bind(entry_id)
        .fetch_optional(self.store.pool())
        .await?;
        let Some(row) = row else {
            return Err(TaskOperationError::DeadLetterNotFound { entry_id });
        };
        Ok(dead_letter_from_row(&row)?)
    }

    /// Lists dead-letter entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get_dead_letters(
        &self,
        limit: u32,
    ) -> Result<Vec<DeadLetterEntry>, TaskOperationError> {
        let rows = sqlx::query(
            "SELECT id, task_id, task_type, payload, metadata, error, stack, retry_count, \
             final_status, attempted_workers, created_at, failed_at \
             FROM dead_letters ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| dead_letter_from_row(row).map_err(Into::into))
            .collect()
    }

    /// Returns a point-in-time snapshot: per-status counts, dead-letter
    /// count, and the mean wall-clock wait of still-pending tasks.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn stats(&self) -> Result<QueueStats, TaskOperationError> {
        let mut stats = QueueStats::default();

        let rows = sqlx::query("SELECT status, COUNT(*) AS cnt FROM tasks GROUP BY status")
            .fetch_all(self.store.pool())
            .await?;
        for row in &rows {
            let raw: String = row.try_get("status").map_err(StorageError::from)?;
            let count: i64 = row.try_get("cnt").map_err(StorageError::from)?;
            let Ok(status) = raw.parse::<TaskStatus>() else {
                return Err(StorageError::Corrupt {
                    key: "tasks.status".to_string(),
                    detail: format!("unknown status: {raw}"),
                }
                .into());
            };
            stats.record(status, u64::try_from(count).unwrap_or(0));
        }

        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM dead_letters")
            .fetch_one(self.store.pool())
            .await?;
        let dead: i64 = row.try_get("cnt").map_err(StorageError::from)?;
        stats.dead_letters = u64::try_from(dead).unwrap_or(0);

        let row = sqlx::query("SELECT AVG(? - created_at) AS wait FROM tasks WHERE status = 'pending'")
            .bind(Utc::now().timestamp_millis())
            .fetch_one(self.store.pool())
            .await?;
        let wait: Option<f64> = row.try_get("wait").map_err(StorageError::from)?;
        stats.avg_wait_ms = wait.unwrap_or(0.0).max(0.0);

        Ok(stats)
    }

    /// Deletes completed and cancelled tasks older than `older_than_ms`,
    /// together with their stored results.
    ///
    /// The only destructive, irreversible operation on the queue.
    ///
    /// # Returns
    ///
    /// The number of tasks removed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn purge_completed(&self, older_than_ms: u64) -> Result<u64, TaskOperationError> {
        let cutoff = Utc::now().timestamp_millis()
            - i64::try_from(older_than_ms).unwrap_or(i64::MAX);

        let mut tx = self.store.begin().await?;
        sqlx::query(
            "DELETE FROM results WHERE task_id IN (SELECT id FROM tasks \
             WHERE status IN ('completed', 'cancelled') \
             AND completed_at IS NOT NULL AND completed_at <= ?)",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'cancelled') \
             AND completed_at IS NOT NULL AND completed_at <= ?",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        tx.commit().await.map_err(StorageError::from)?;

        let removed = result.rows_affected();
        if removed > 0 {
            counter!("foreman.tasks.purged").increment(removed);
            tracing::info!(removed, "purged retained tasks");
        }
        Ok(removed)
    }

    /// Flips running tasks that have exceeded their timeout to `timeout`
    /// and returns them for recovery.
    ///
    /// Detection uses `started_at + timeout_ms` against the current time;
    /// the coordinator routes reaped tasks through the same
    /// retry-or-dead-letter decision as reported failures.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn reap_timed_out(&self) -> Result<Vec<Task>, TaskOperationError> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        let mut tx = self.store.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'running' \
             AND started_at IS NOT NULL AND started_at + timeout_ms <= ?"
        ))
        .bind(now_ms)
        .fetch_all(&mut *tx)
        .await?;

        let mut reaped = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut task = task_from_row(row)?;
            task.status = TaskStatus::Timeout;
            task.completed_at = Some(now);
            task.last_error = Some(format!("execution exceeded {}ms timeout", task.timeout_ms));

            sqlx::query(
                "UPDATE tasks SET status = 'timeout', completed_at = ?, last_error = ? \
                 WHERE id = ? AND status = 'running'",
            )
            .bind(now_ms)
            .bind(task.last_error.as_deref())
            .bind(task.id.to_string())
            .execute(&mut *tx)
            .await?;

            counter!("foreman.tasks.timed_out", "task_type" => task.task_type.clone())
                .increment(1);
            tracing::warn!(task_id = %task.id, timeout_ms = task.timeout_ms, "task timed out");
            reaped.push(task);
        }
        tx.commit().await.map_err(StorageError::from)?;

        Ok(reaped)
    }

    /// Lists pending tasks in dispatch order. Used by the coordinator's
    /// matching pass to walk candidates page by page.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn list_pending(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Task>, TaskOperationError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC, rowid ASC LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.store.pool())
        .await?;

        rows.iter()
            .map(|row| task_from_row(row).map_err(Into::into))
            .collect()
    }
}

/// Inserts a task row on the given executor (pool or transaction).
async fn insert_task<'e, E>(executor: E, task: &Task) -> Result<(), StorageError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let payload = serde_json::to_string(&task.payload)?;
    let required = serde_json::to_string(&task.required_capabilities)?;
    let attempted = serde_json::to_string(&task.attempted_workers)?;
    let metadata = task
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT INTO tasks (id, task_type, payload, priority, status, timeout_ms, max_retries, \
         attempt_count, base_delay_ms, max_delay_ms, backoff_factor, required_capabilities, \
         affinity, assigned_worker, attempted_workers, parent_task_id, metadata, last_error, \
         result_id, created_at, assigned_at, started_at, completed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.id.to_string())
    .bind(&task.task_type)
    .bind(&payload)
    .bind(task.priority.rank())
    .bind(task.status.as_str())
    .bind(i64::try_from(task.timeout_ms).unwrap_or(i64::MAX))
    .bind(i64::from(task.max_retries))
    .bind(i64::from(task.attempt_count))
    .bind(i64::from(task.retry_policy.base_delay_ms))
    .bind(i64::from(task.retry_policy.max_delay_ms))
    .bind(task.retry_policy.backoff_factor)
    .bind(&required)
    .bind(task.affinity.as_deref())
    .bind(task.assigned_worker.as_deref())
    .bind(&attempted)
    .bind(task.parent_task_id.map(|id| id.to_string()))
    .bind(metadata)
    .bind(task.last_error.as_deref())
    .bind(task.result_id.map(|id| id.to_string()))
    .bind(task.created_at.timestamp_millis())
    .bind(task.assigned_at.map(|t| t.timestamp_millis()))
    .bind(task.started_at.map(|t| t.timestamp_millis()))
    .bind(task.completed_at.map(|t| t.timestamp_millis()))
    .execute(executor)
    .await?;

    Ok(())
}

/// Fetches a task inside a transaction, mapping a missing row to `NotFound`.
async fn fetch_task(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    task_id: Uuid,
) -> Result<Task, TaskOperationError> {
    let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
        .bind(task_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
    let Some(row) = row else {
        return Err(TaskOperationError::not_found(task_id));
    };
    Ok(task_from_row(&row)?)
}

/// Persists the mutable transition columns of a task.
async fn persist_transition(
    tx: &mut sqlx::Transaction<'static, sqlx::Sqlite>,
    task: &Task,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE tasks SET status = ?, last_error = ?, result_id = ?, assigned_at = ?, \
         started_at = ?, completed_at = ? WHERE id = ?",
    )
    .bind(task.status.as_str())
    .bind(task.last_error.as_deref())
    .bind(task.result_id.map(|id| id.to_string()))
    .bind(task.assigned_at.map(|t| t.timestamp_millis()))
    .bind(task.started_at.map(|t| t.timestamp_millis()))
    .bind(task.completed_at.map(|t| t.timestamp_millis()))
    .bind(task.id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_uuid(raw: &str, key: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(raw).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        detail: format!("invalid uuid '{raw}': {e}"),
    })
}

fn timestamp_from_millis(ms: i64, key: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StorageError::Corrupt {
        key: key.to_string(),
        detail: format!("timestamp out of range: {ms}"),
    })
}

fn opt_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
    row.try_get::<Option<i64>, _>(column)?
        .map(|ms| timestamp_from_millis(ms, column))
        .transpose()
}

fn task_from_row(row: &SqliteRow) -> Result<Task, StorageError> {
    let id_raw: String = row.try_get("id")?;
    let id = parse_uuid(&id_raw, "tasks.id")?;

    let status_raw: String = row.try_get("status")?;
    let status = status_raw
        .parse::<TaskStatus>()
        .map_err(|()| StorageError::Corrupt {
            key: format!("task {id}"),
            detail: format!("unknown status: {status_raw}"),
        })?;

    let payload_raw: String = row.try_get("payload")?;
    let required_raw: String = row.try_get("required_capabilities")?;
    let attempted_raw: String = row.try_get("attempted_workers")?;
    let metadata_raw: Option<String> = row.try_get("metadata")?;
    let parent_raw: Option<String> = row.try_get("parent_task_id")?;
    let result_raw: Option<String> = row.try_get("result_id")?;

    Ok(Task {
        id,
        task_type: row.try_get("task_type")?,
        payload: serde_json::from_str(&payload_raw)?,
        priority: TaskPriority::from_rank(row.try_get("priority")?),
        status,
        timeout_ms: u64::try_from(row.try_get::<i64, _>("timeout_ms")?).unwrap_or(0),
        max_retries: u32::try_from(row.try_get::<i64, _>("max_retries")?).unwrap_or(0),
        attempt_count: u32::try_from(row.try_get::<i64, _>("attempt_count")?).unwrap_or(0),
        retry_policy: RetryPolicy {
            base_delay_ms: u32::try_from(row.try_get::<i64, _>("base_delay_ms")?).unwrap_or(0),
            max_delay_ms: u32::try_from(row.try_get::<i64, _>("max_delay_ms")?).unwrap_or(0),
            backoff_factor: row.try_get("backoff_factor")?,
        },
        required_capabilities: serde_json::from_str(&required_raw)?,
        affinity: row.try_get("affinity")?,
        assigned_worker: row.try_get("assigned_worker")?,
        attempted_workers: serde_json::from_str(&attempted_raw)?,
        parent_task_id: parent_raw
            .map(|raw| parse_uuid(&raw, "tasks.parent_task_id"))
            .transpose()?,
        metadata: metadata_raw
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        last_error: row.try_get("last_error")?,
        result_id: result_raw
            .map(|raw| parse_uuid(&raw, "tasks.result_id"))
            .transpose()?,
        created_at: timestamp_from_millis(row.try_get("created_at")?, "tasks.created_at")?,
        assigned_at: opt_timestamp(row, "assigned_at")?,
        started_at: opt_timestamp(row, "started_at")?,
        completed_at: opt_timestamp(row, "completed_at")?,
    })
}

fn dead_letter_from_row(row: &SqliteRow) -> Result<DeadLetterEntry, StorageError> {
    let task_id_raw: String = row.try_get("task_id")?;
    let payload_raw: String = row.try_get("payload")?;
    let metadata_raw: Option<String> = row.try_get("metadata")?;
    let attempted_raw: String = row.try_get("attempted_workers")?;

    Ok(DeadLetterEntry {
        id: row.try_get("id")?,
        task_id: parse_uuid(&task_id_raw, "dead_letters.task_id")?,
        task_type: row.try_get("task_type")?,
        payload: serde_json::from_str(&payload_raw)?,
        metadata: metadata_raw
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        error: row.try_get("error")?,
        stack: row.try_get("stack")?,
        retry_count: u32::try_from(row.try_get::<i64, _>("retry_count")?).unwrap_or(0),
        final_status: row.try_get("final_status")?,
        attempted_workers: serde_json::from_str(&attempted_raw)?,
        created_at: timestamp_from_millis(row.try_get("created_at")?, "dead_letters.created_at")?,
        failed_at: timestamp_from_millis(row.try_get("failed_at")?, "dead_letters.failed_at")?,
    })
}
