//! Data models for tasks, workers, retry policies and dead-letter entries.

pub mod dead_letter;
pub mod retry;
pub mod task;
pub mod worker;

pub use dead_letter::DeadLetterEntry;
pub use retry::RetryPolicy;
pub use task::{Task, TaskPriority, TaskResult, TaskStatus, TaskSubmission, TaskSubmissionBuilder};
pub use worker::{WorkerDescriptor, WorkerInfo};
