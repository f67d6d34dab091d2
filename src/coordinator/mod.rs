//! The coordinator: matching loop, submission surface, observability.
//!
//! A single coordinator instance is authoritative for its store. The
//! matching pass walks pending tasks in dispatch order, picks an idle
//! capability-matching worker for each, and binds them through the queue's
//! compare-and-set `assign`. One pass runs per trigger, never a busy-wait loop; `start()` drives passes from a timer, or the embedding
//! system calls [`Coordinator::process_queue`] itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::distributor::{CompletionOutcome, Distributor};
use crate::events::{Bus, QueueEvent};
use crate::models::{
    DeadLetterEntry, Task, TaskResult, TaskSubmission, WorkerDescriptor, WorkerInfo,
};
use crate::queue::{QueueStats, TaskOperationError, TaskQueue};
use crate::registry::WorkerRegistry;
use crate::storage::Store;

/// Task counts plus a percent-complete figure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    /// All tasks currently retained in the store.
    pub total: u64,
    /// Tasks waiting to be matched.
    pub pending: u64,
    /// Tasks assigned or running.
    pub running: u64,
    /// Successfully completed tasks.
    pub completed: u64,
    /// `completed / total`, as a percentage; 0 when the store is empty.
    pub percent_complete: f64,
}

/// Worker occupancy and queue depth, for backpressure decisions.
///
/// The coordinator only reports; whether to refuse new submissions above a
/// depth threshold is the embedding system's policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Health {
    /// Workers with no active assignment.
    pub idle_workers: usize,
    /// Workers with at least one active assignment.
    pub busy_workers: usize,
    /// Pending tasks waiting to be matched.
    pub queue_depth: u64,
}

/// Orchestrates the queue, registry and distributor.
///
/// Cheap to clone; clones share all state, so the started poll loop and
/// direct callers observe one coordinator.
#[derive(Debug, Clone)]
pub struct Coordinator {
    queue: TaskQueue,
    registry: WorkerRegistry,
    distributor: Distributor,
    bus: Bus,
    config: CoordinatorConfig,
    running: Arc<AtomicBool>,
    match_lock: Arc<tokio::sync::Mutex<()>>,
    loop_handle: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl Coordinator {
    /// Creates a coordinator over the given store with default
    /// configuration.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_config(store, CoordinatorConfig::default())
    }

    /// Creates a coordinator with explicit configuration.
    ///
    /// Lifecycle notifications are inactive until [`start`](Self::start) is
    /// called.
    #[must_use]
    pub fn with_config(store: Store, config: CoordinatorConfig) -> Self {
        let queue = TaskQueue::new(store);
        let registry = WorkerRegistry::new();
        let bus = Bus::new(config.event_capacity);
        bus.set_enabled(false);
        let distributor = Distributor::new(queue.clone(), registry.clone(), bus.clone());

        Self {
            queue,
            registry,
            distributor,
            bus,
            config,
            running: Arc::new(AtomicBool::new(false)),
            match_lock: Arc::new(tokio::sync::Mutex::new(())),
            loop_handle: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Returns the underlying queue.
    #[must_use]
    pub const fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Returns the worker registry.
    #[must_use]
    pub const fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Returns the distributor (the execution-reporting surface).
    #[must_use]
    pub const fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }

    /// Submits a task and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] if the enqueue fails.
    pub async fn submit_task(
        &self,
        submission: TaskSubmission,
    ) -> Result<Uuid, TaskOperationError> {
        let task = self.queue.enqueue(submission).await?;
        self.publish_enqueued(&task);
        Ok(task.id)
    }

    /// Submits a batch of tasks atomically and returns their ids.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] if the batch fails; none of
    /// the batch is visible in that case.
    pub async fn submit_tasks(
        &self,
        submissions: Vec<TaskSubmission>,
    ) -> Result<Vec<Uuid>, TaskOperationError> {
        let tasks = self.queue.enqueue_batch(submissions).await?;
        for task in &tasks {
            self.publish_enqueued(task);
        }
        Ok(tasks.iter().map(|t| t.id).collect())
    }

    fn publish_enqueued(&self, task: &Task) {
        self.bus.publish(QueueEvent::TaskEnqueued {
            task_id: task.id,
            task_type: task.task_type.clone(),
            priority: task.priority,
        });
    }

    /// Registers a worker and returns its id.
    pub fn register_worker(&self, descriptor: WorkerDescriptor) -> String {
        self.registry.register(descriptor)
    }

    /// Deregisters a worker.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::WorkerNotFound`] if the id is unknown.
    pub fn deregister_worker(&self, worker_id: &str) -> Result<WorkerInfo, TaskOperationError> {
        self.registry.deregister(worker_id)
    }

    /// Runs one matching pass: repeatedly binds the highest-priority
    /// eligible pending task to an idle capability-matching worker until no
    /// further match exists. Returns the number of assignments made.
    ///
    /// Passes are serialized internally, so concurrent triggers cannot
    /// double-assign; the queue's compare-and-set is the backstop.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn process_queue(&self) -> Result<u32, TaskOperationError> {
        let _guard = self.match_lock.lock().await;
        let mut assigned = 0_u32;

        loop {
            let idle = self.registry.idle_workers();
            if idle.is_empty() {
                break;
            }

            let Some((task, worker_id)) = self.find_match(&idle).await? else {
                break;
            };

            match self.queue.assign(task.id, &worker_id).await {
                Ok(_) => {
                    if self.registry.task_started(&worker_id) {
                        self.bus.publish(QueueEvent::TaskAssigned {
                            task_id: task.id,
                            worker_id,
                        });
                        assigned += 1;
                    } else {
                        // Worker deregistered between selection and the
                        // assignment write: undo the binding.
                        tracing::warn!(
                            task_id = %task.id,
                            worker_id = %worker_id,
                            "assigned worker vanished mid-match, requeueing"
                        );
                        self.queue.requeue(task.id).await?;
                    }
                }
                // Lost the compare-and-set to another pass; try the next
                // candidate.
                Err(TaskOperationError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(assigned)
    }

    /// Finds the first pending task (in dispatch order) that some idle
    /// worker can service, preferring the task's affinity hint when that
    /// worker is idle and eligible.
    async fn find_match(
        &self,
        idle: &[WorkerInfo],
    ) -> Result<Option<(Task, String)>, TaskOperationError> {
        let page_size = self.config.match_page;
        let mut offset = 0_u32;

        loop {
            let page = self.queue.list_pending(page_size, offset).await?;
            if page.is_empty() {
                return Ok(None);
            }
            let page_len = page.len() as u32;

            for task in page {
                let eligible =
                    |w: &&WorkerInfo| w.can_service(&task.required_capabilities);

                let preferred = task.affinity.as_deref().and_then(|hint| {
                    idle.iter()
                        .filter(eligible)
                        .find(|w| w.worker_id == hint)
                });
                let chosen = preferred.or_else(|| idle.iter().find(eligible));

                if let Some(worker) = chosen {
                    return Ok(Some((task, worker.worker_id.clone())));
                }
            }

            if page_len < page_size {
                return Ok(None);
            }
            offset += page_size;
        }
    }

    /// Reaps running tasks that exceeded their timeout and routes each
    /// through the retry-or-dead-letter decision. Returns how many tasks
    /// were recovered.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn recover_timed_out(&self) -> Result<u32, TaskOperationError> {
        let reaped = self.queue.reap_timed_out().await?;
        let count = reaped.len() as u32;

        for task in reaped {
            if let Some(worker_id) = task.assigned_worker.clone() {
                self.registry.task_finished(&worker_id, false);
            }
            let error = task
                .last_error
                .clone()
                .unwrap_or_else(|| "execution timed out".to_string());
            match self
                .distributor
                .retry_or_dead_letter(&task, &error, None)
                .await?
            {
                CompletionOutcome::RetryScheduled { attempt, .. } => {
                    tracing::debug!(task_id = %task.id, attempt, "timed-out task requeued");
                }
                CompletionOutcome::DeadLettered { entry_id } => {
                    tracing::debug!(task_id = %task.id, entry_id, "timed-out task dead-lettered");
                }
                CompletionOutcome::Completed => {}
            }
        }

        Ok(count)
    }

    /// Reports task counts and a percent-complete figure.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get_progress(&self) -> Result<Progress, TaskOperationError> {
        let stats = self.queue.stats().await?;
        let total = stats.total();
        let percent_complete = if total == 0 {
            0.0
        } else {
            stats.completed as f64 / total as f64 * 100.0
        };

        Ok(Progress {
            total,
            pending: stats.pending,
            running: stats.assigned + stats.running,
            completed: stats.completed,
            percent_complete,
        })
    }

    /// Snapshot of workers whose heartbeat is younger than the configured
    /// threshold.
    #[must_use]
    pub fn healthy_workers(&self) -> Vec<WorkerInfo> {
        let threshold = chrono::Duration::milliseconds(
            i64::try_from(self.config.heartbeat_threshold_ms).unwrap_or(i64::MAX),
        );
        self.registry.healthy_workers(threshold)
    }

    /// Reports worker occupancy and queue depth.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get_health(&self) -> Result<Health, TaskOperationError> {
        let (idle_workers, busy_workers) = self.registry.occupancy();
        let stats = self.queue.stats().await?;

        Ok(Health {
            idle_workers,
            busy_workers,
            queue_depth: stats.pending,
        })
    }

    /// Returns a queue statistics snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get_stats(&self) -> Result<QueueStats, TaskOperationError> {
        self.queue.stats().await
    }

    /// Returns the stored result of a task, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn get_result(
        &self,
        task_id: Uuid,
    ) -> Result<Option<TaskResult>, TaskOperationError> {
        self.distributor.get_result(task_id).await
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
        self.queue.get_dead_letters(limit).await
    }

    /// Retries a dead-lettered task, returning the new task id, or `None`
    /// if the entry no longer exists. The new task is announced like any
    /// other submission.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn retry_dead_letter(
        &self,
        entry_id: i64,
    ) -> Result<Option<Uuid>, TaskOperationError> {
        let Some(new_task_id) = self.queue.retry_dead_letter(entry_id).await? else {
            return Ok(None);
        };
        if let Some(task) = self.queue.get(new_task_id).await? {
            self.publish_enqueued(&task);
        }
        Ok(Some(new_task_id))
    }

    /// Deletes completed and cancelled tasks older than `older_than_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::Storage`] on storage failure.
    pub async fn purge_completed(&self, older_than_ms: u64) -> Result<u64, TaskOperationError> {
        self.queue.purge_completed(older_than_ms).await
    }

    /// Cancels a task; the announcement goes out on the event bus.
    ///
    /// # Errors
    ///
    /// * [`TaskOperationError::NotFound`] - no such task
    /// * [`TaskOperationError::InvalidTransition`] - task already terminal
    /// * [`TaskOperationError::Storage`] - storage failure
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<Task, TaskOperationError> {
        let task = self.queue.cancel(task_id).await?;
        self.bus.publish(QueueEvent::TaskCancelled { task_id });
        Ok(task)
    }

    /// Starts the poll loop and activates lifecycle notifications.
    ///
    /// Each tick runs one matching pass and one timeout-recovery pass.
    /// Idempotent: calling `start` on a running coordinator does nothing.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.set_enabled(true);

        let coordinator = self.clone();
        let interval = std::time::Duration::from_millis(self.config.poll_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !coordinator.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = coordinator.process_queue().await {
                    tracing::error!(error = %e, "matching pass failed");
                }
                if let Err(e) = coordinator.recover_timed_out().await {
                    tracing::error!(error = %e, "timeout recovery failed");
                }
            }
        });
        *self.loop_handle.lock() = Some(handle);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            "coordinator started"
        );
    }

    /// Stops the poll loop and deactivates notifications.
    ///
    /// Idempotent; after `stop` returns, the coordinator initiates no
    /// further mutation (in-flight callers of the direct APIs are
    /// unaffected).
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.bus.set_enabled(false);

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        if was_running {
            tracing::info!("coordinator stopped");
        }
    }

    /// Whether the poll loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
