//! Lifecycle event bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] providing
//! non-blocking publishing of queue lifecycle events to any number of
//! subscribers (UI, logging, audit sinks in the embedding system).
//!
//! Properties:
//! - **Non-blocking publish**: `publish()` never blocks or awaits.
//! - **Bounded capacity**: a ring buffer of recent events; slow receivers
//!   observe `RecvError::Lagged(n)` and skip the `n` oldest items.
//! - **No persistence**: events are dropped when nobody is subscribed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::TaskPriority;

/// A queue lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A task entered the queue.
    TaskEnqueued {
        /// The new task.
        task_id: Uuid,
        /// Its declared type.
        task_type: String,
        /// Its scheduling priority.
        priority: TaskPriority,
    },
    /// A task was bound to a worker.
    TaskAssigned {
        /// The assigned task.
        task_id: Uuid,
        /// The worker it was bound to.
        worker_id: String,
    },
    /// A task completed successfully.
    TaskCompleted {
        /// The completed task.
        task_id: Uuid,
    },
    /// A failed task was requeued; the retry should run after `delay_ms`.
    TaskRetryScheduled {
        /// The requeued task.
        task_id: Uuid,
        /// Attempt number just recorded.
        attempt: u32,
        /// Computed backoff delay for the embedder's scheduler.
        delay_ms: u64,
    },
    /// A task exhausted its retries and moved to the dead-letter queue.
    TaskDeadLettered {
        /// The failed task.
        task_id: Uuid,
        /// The dead-letter entry created for it.
        entry_id: i64,
    },
    /// A task was cancelled.
    TaskCancelled {
        /// The cancelled task.
        task_id: Uuid,
    },
}

/// Broadcast channel for lifecycle events.
///
/// Cheap to clone (the sender is `Arc`-backed). Publishing is gated by an
/// enable flag shared across clones: the coordinator's `stop()` disables
/// notifications without tearing down subscriptions.
#[derive(Debug, Clone)]
pub struct Bus {
    tx: broadcast::Sender<QueueEvent>,
    enabled: Arc<AtomicBool>,
}

impl Bus {
    /// Creates a bus with the given channel capacity (clamped to >= 1).
    /// The bus starts enabled.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// Dropped silently when the bus is disabled or nobody is subscribed.
    pub fn publish(&self, event: QueueEvent) {
        if self.enabled.load(Ordering::Relaxed) {
            let _ = self.tx.send(event);
        }
    }

    /// Creates an independent receiver observing subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Enables or disables publishing across all clones of this bus.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether publishing is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}
