//! In-process worker adapter.
//!
//! The coordination core specifies only the state-transition contract for
//! workers; this module is the in-process adapter for embedders that run
//! handlers in the same process. Register a [`TaskHandler`] per task type,
//! then drive assigned tasks through [`execute_task`], which enforces the
//! task's timeout and reports the outcome to the distributor.

mod execute;
mod handler;

pub use execute::execute_task;
pub use handler::{HandlerRegistry, TaskHandler};
