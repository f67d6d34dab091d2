//! Dead-letter entry model.
//!
//! A dead-letter entry is the permanent record of a task that exhausted its
//! retries or was force-failed. At most one entry exists per terminal
//! failure; retrying from the dead-letter queue creates a brand-new task and
//! removes the entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Permanent record of a permanently failed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Incrementing entry id assigned by the store.
    pub id: i64,

    /// Id of the original task.
    pub task_id: Uuid,

    /// Type of the original task.
    pub task_type: String,

    /// Payload of the original task, preserved verbatim for retry.
    pub payload: Value,

    /// Metadata of the original task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Final error message.
    pub error: String,

    /// Stack trace accompanying the final error, if the reporter had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// How many attempts were recorded before the task was dead-lettered.
    pub retry_count: u32,

    /// Status the task held when it was moved here.
    pub final_status: String,

    /// Every worker that attempted the task, in order.
    pub attempted_workers: Vec<String>,

    /// When the original task was created.
    pub created_at: DateTime<Utc>,

    /// When the task was moved to the dead-letter queue.
    pub failed_at: DateTime<Utc>,
}
