//! Priority-ordered durable task queue.
//!
//! All state transitions go through this module. Dequeue is a
//! non-destructive peek; binding a task to a worker is a separate
//! compare-and-set (`assign`), so two callers can never claim the same task.

mod error;
mod ops;
mod stats;

pub use error::TaskOperationError;
pub use ops::TaskQueue;
pub use stats::QueueStats;
