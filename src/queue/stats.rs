//! Queue statistics.

use serde::{Deserialize, Serialize};

use crate::models::TaskStatus;

/// A point-in-time snapshot of queue contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks waiting to be matched.
    pub pending: u64,
    /// Tasks bound to a worker, not yet started.
    pub assigned: u64,
    /// Tasks whose execution was reported started.
    pub running: u64,
    /// Successfully completed tasks still retained.
    pub completed: u64,
    /// Failed tasks (including dead-lettered ones).
    pub failed: u64,
    /// Tasks that exceeded their execution timeout.
    pub timeout: u64,
    /// Cancelled tasks still retained.
    pub cancelled: u64,
    /// Entries in the dead-letter queue.
    pub dead_letters: u64,
    /// Mean wall-clock wait of still-pending tasks, in milliseconds.
    pub avg_wait_ms: f64,
}

impl QueueStats {
    /// Count of tasks currently in the given status.
    #[must_use]
    pub const fn by_status(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Assigned => self.assigned,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Timeout => self.timeout,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Total tasks across all statuses.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending
            + self.assigned
            + self.running
            + self.completed
            + self.failed
            + self.timeout
            + self.cancelled
    }

    pub(crate) fn record(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending = count,
            TaskStatus::Assigned => self.assigned = count,
            TaskStatus::Running => self.running = count,
            TaskStatus::Completed => self.completed = count,
            TaskStatus::Failed => self.failed = count,
            TaskStatus::Timeout => self.timeout = count,
            TaskStatus::Cancelled => self.cancelled = count,
        }
    }
}
