//! In-memory worker registry.
//!
//! Tracks worker identity, declared capabilities and liveness. Worker
//! records are ephemeral: they live for the registry's lifetime and are
//! removed on deregistration. The registry is owned state: multiple
//! registries coexist in one process (and in tests).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::models::{WorkerDescriptor, WorkerInfo};
use crate::queue::TaskOperationError;

/// Registry of live workers.
///
/// Cheap to clone; all clones share the same map. All operations are
/// synchronous point queries guarded by a read-write lock, so the registry
/// can be consulted from the matching loop while registrations arrive
/// concurrently.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<RwLock<HashMap<String, WorkerInfo>>>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker and returns its assigned id.
    ///
    /// The id embeds the declared name plus a random suffix, so two workers
    /// registering under the same name stay distinguishable.
    pub fn register(&self, descriptor: WorkerDescriptor) -> String {
        let suffix = Uuid::new_v4();
        let suffix_short = suffix.to_string();
        let suffix_short = suffix_short.split('-').next().unwrap_or("0");
        let worker_id = format!("{}-{suffix_short}", descriptor.name);

        let info = WorkerInfo::new(worker_id.clone(), descriptor, Utc::now());
        tracing::info!(worker_id = %worker_id, capabilities = ?info.capabilities, "worker registered");
        self.workers.write().insert(worker_id.clone(), info);
        worker_id
    }

    /// Removes a worker.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::WorkerNotFound`] if the id is not
    /// registered.
    pub fn deregister(&self, worker_id: &str) -> Result<WorkerInfo, TaskOperationError> {
        let removed = self.workers.write().remove(worker_id);
        match removed {
            Some(info) => {
                tracing::info!(worker_id = %worker_id, "worker deregistered");
                Ok(info)
            }
            None => Err(TaskOperationError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            }),
        }
    }

    /// Returns a snapshot of a worker's record.
    #[must_use]
    pub fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.workers.read().get(worker_id).cloned()
    }

    /// Returns a snapshot of every registered worker.
    #[must_use]
    pub fn list(&self) -> Vec<WorkerInfo> {
        self.workers.read().values().cloned().collect()
    }

    /// Number of registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    /// True when no workers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    /// Records a heartbeat for the worker.
    ///
    /// # Errors
    ///
    /// Returns [`TaskOperationError::WorkerNotFound`] if the id is not
    /// registered.
    pub fn heartbeat(&self, worker_id: &str) -> Result<(), TaskOperationError> {
        let mut workers = self.workers.write();
        let Some(info) = workers.get_mut(worker_id) else {
            return Err(TaskOperationError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            });
        };
        info.touch_at(Utc::now());
        Ok(())
    }

    /// Snapshot of workers with no active assignment.
    #[must_use]
    pub fn idle_workers(&self) -> Vec<WorkerInfo> {
        self.workers
            .read()
            .values()
            .filter(|w| w.is_idle())
            .cloned()
            .collect()
    }

    /// Counts of (idle, busy) workers.
    #[must_use]
    pub fn occupancy(&self) -> (usize, usize) {
        let workers = self.workers.read();
        let idle = workers.values().filter(|w| w.is_idle()).count();
        (idle, workers.len() - idle)
    }

    /// Snapshot of workers whose heartbeat is younger than `threshold`.
    #[must_use]
    pub fn healthy_workers(&self, threshold: Duration) -> Vec<WorkerInfo> {
        let now = Utc::now();
        self.workers
            .read()
            .values()
            .filter(|w| w.is_healthy_at(now, threshold))
            .cloned()
            .collect()
    }

    /// Marks one assignment against the worker.
    ///
    /// Returns false if the worker vanished since it was selected; the
    /// caller must requeue whatever it just assigned.
    #[must_use]
    pub fn task_started(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.write();
        match workers.get_mut(worker_id) {
            Some(info) => {
                info.record_assigned_at(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Releases one assignment from the worker, recording the outcome in
    /// its lifetime counters. A no-op for workers that already deregistered.
    pub fn task_finished(&self, worker_id: &str, success: bool) {
        let mut workers = self.workers.write();
        if let Some(info) = workers.get_mut(worker_id) {
            let now = Utc::now();
            if success {
                info.record_completed_at(now);
            } else {
                info.record_failed_at(now);
            }
        }
    }
}
