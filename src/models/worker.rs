//! Worker identity and liveness model.
//!
//! This module contains the [`WorkerInfo`] struct which represents a
//! registered worker in the coordination system, and the
//! [`WorkerDescriptor`] callers hand to the registry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What a caller declares when registering a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    /// Human-readable name, embedded in the generated worker id.
    pub name: String,
    /// Capability tags this worker can service.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl WorkerDescriptor {
    /// Creates a descriptor with the given name and capabilities.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

/// A registered worker.
///
/// Worker records live in memory for the registry's lifetime; they are not
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique identifier assigned at registration.
    pub worker_id: String,

    /// Declared name.
    pub name: String,

    /// Capability tags this worker can service.
    pub capabilities: Vec<String>,

    /// Number of tasks currently assigned or running on this worker.
    pub active_tasks: u32,

    /// When this worker registered.
    pub registered_at: DateTime<Utc>,

    /// Last heartbeat timestamp.
    pub last_heartbeat: DateTime<Utc>,

    /// Lifetime count of completed tasks.
    pub tasks_completed: u64,

    /// Lifetime count of failed tasks.
    pub tasks_failed: u64,
}

impl WorkerInfo {
    /// Creates a new `WorkerInfo` from a descriptor at the given time.
    #[must_use]
    pub fn new(worker_id: impl Into<String>, descriptor: WorkerDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.into(),
            name: descriptor.name,
            capabilities: descriptor.capabilities,
            active_tasks: 0,
            registered_at: now,
            last_heartbeat: now,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }

    /// A worker is idle when it has no active assignment.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.active_tasks == 0
    }

    /// Exact-subset capability matching: eligible iff every required tag
    /// appears in this worker's capability set. An empty requirement matches
    /// every worker.
    #[must_use]
    pub fn can_service(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|cap| self.capabilities.iter().any(|have| have == cap))
    }

    /// Checks liveness based on heartbeat age.
    #[must_use]
    pub fn is_healthy_at(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) < threshold
    }

    /// Updates the heartbeat timestamp to the provided time.
    pub const fn touch_at(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = now;
    }

    /// Records an assignment using the provided time.
    pub const fn record_assigned_at(&mut self, now: DateTime<Utc>) {
        self.active_tasks += 1;
        self.touch_at(now);
    }

    /// Records a completed task using the provided time.
    pub const fn record_completed_at(&mut self, now: DateTime<Utc>) {
        self.tasks_completed += 1;
        self.active_tasks = self.active_tasks.saturating_sub(1);
        self.touch_at(now);
    }

    /// Records a failed task using the provided time.
    pub const fn record_failed_at(&mut self, now: DateTime<Utc>) {
        self.tasks_failed += 1;
        self.active_tasks = self.active_tasks.saturating_sub(1);
        self.touch_at(now);
    }
}
