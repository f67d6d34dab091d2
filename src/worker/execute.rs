//! Task execution with timeout enforcement.

use std::time::{Duration, Instant};

use metrics::histogram;
use serde_json::Value;
use tokio::time::timeout;

use crate::distributor::{CompletionOutcome, Distributor};
use crate::models::Task;
use crate::queue::TaskOperationError;

use super::handler::HandlerRegistry;

/// Executes an assigned task with the appropriate handler and reports the
/// outcome through the distributor.
///
/// This function:
/// 1. Reports `start_task` (transitioning `assigned -> running`)
/// 2. Looks up the handler for the task's type
/// 3. Runs it under the task's `timeout_ms`
/// 4. Reports `complete_task` with success or failure
///
/// A missing handler and a timeout are both reported as failures; they
/// feed the retry policy like any other execution failure.
///
/// # Errors
///
/// Only structural errors propagate: [`TaskOperationError::NotFound`],
/// [`TaskOperationError::InvalidTransition`] if the task is not currently
/// assigned, and [`TaskOperationError::Storage`].
pub async fn execute_task(
    distributor: &Distributor,
    task: &Task,
    handlers: &HandlerRegistry,
) -> Result<CompletionOutcome, TaskOperationError> {
    distributor.start_task(task.id).await?;

    let Some(handler) = handlers.get(&task.task_type) else {
        return distributor
            .complete_task(
                task.id,
                false,
                Value::String(format!(
                    "No handler registered for task type: {}",
                    task.task_type
                )),
            )
            .await;
    };

    let limit = Duration::from_millis(task.timeout_ms);
    let start = Instant::now();

    let outcome = match timeout(limit, handler.handle(task.payload.clone())).await {
        // Handler completed within the timeout
        Ok(Ok(output)) => distributor.complete_task(task.id, true, output).await?,
        // Handler reported a failure
        Ok(Err(error)) => {
            distributor
                .complete_task(task.id, false, Value::String(error))
                .await?
        }
        // Handler timed out
        Err(_elapsed) => {
            distributor
                .complete_task(
                    task.id,
                    false,
                    Value::String(format!("execution exceeded {}ms timeout", task.timeout_ms)),
                )
                .await?
        }
    };

    histogram!("foreman.task.duration_seconds", "task_type" => task.task_type.clone())
        .record(start.elapsed().as_secs_f64());

    Ok(outcome)
}
