//! Test: in-process handler execution with timeout enforcement.

use async_trait::async_trait;
use foreman::{
    execute_task, CompletionOutcome, HandlerRegistry, TaskHandler, TaskStatus, TaskSubmission,
    WorkerDescriptor,
};
use serde_json::{json, Value};

use crate::common::test_coordinator;

struct SumHandler;

#[async_trait]
impl TaskHandler for SumHandler {
    fn task_type(&self) -> &str {
        "sum"
    }

    async fn handle(&self, payload: Value) -> Result<Value, String> {
        let n = payload["n"].as_i64().ok_or("missing n")?;
        Ok(json!({"result": n * 2}))
    }
}

struct FailingHandler;

#[async_trait]
impl TaskHandler for FailingHandler {
    fn task_type(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, _payload: Value) -> Result<Value, String> {
        Err("temporary failure".to_string())
    }
}

struct SlowHandler;

#[async_trait]
impl TaskHandler for SlowHandler {
    fn task_type(&self) -> &str {
        "slow"
    }

    async fn handle(&self, _payload: Value) -> Result<Value, String> {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        Ok(json!({}))
    }
}

async fn assigned_task(
    coordinator: &foreman::Coordinator,
    submission: TaskSubmission,
) -> foreman::Task {
    let task_id = coordinator.submit_task(submission).await.expect("submit");
    assert_eq!(coordinator.process_queue().await.expect("match"), 1);
    coordinator
        .queue()
        .get(task_id)
        .await
        .expect("get")
        .expect("task")
}

#[tokio::test]
async fn test_execute_success_path() {
    let (_dir, coordinator) = test_coordinator().await;
    let mut handlers = HandlerRegistry::new();
    handlers.register(Box::new(SumHandler));

    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    let task = assigned_task(&coordinator, TaskSubmission::new("sum", json!({"n": 42}))).await;

    let outcome = execute_task(coordinator.distributor(), &task, &handlers)
        .await
        .expect("execute");
    assert_eq!(outcome, CompletionOutcome::Completed);

    let result = coordinator
        .get_result(task.id)
        .await
        .expect("result")
        .expect("stored");
    assert_eq!(result.data, json!({"result": 84}));
}

#[tokio::test]
async fn test_execute_failure_feeds_retry_policy() {
    let (_dir, coordinator) = test_coordinator().await;
    let mut handlers = HandlerRegistry::new();
    handlers.register(Box::new(FailingHandler));

    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    let task = assigned_task(
        &coordinator,
        TaskSubmission::builder("flaky", json!({}))
            .max_retries(3)
            .build(),
    )
    .await;

    let outcome = execute_task(coordinator.distributor(), &task, &handlers)
        .await
        .expect("execute");
    assert!(matches!(
        outcome,
        CompletionOutcome::RetryScheduled { attempt: 1, .. }
    ));

    let stored = coordinator
        .queue()
        .get(task.id)
        .await
        .expect("get")
        .expect("task");
    assert_eq!(stored.status, TaskStatus::Pending);
    assert_eq!(stored.last_error.as_deref(), Some("temporary failure"));
}

#[tokio::test]
async fn test_execute_missing_handler_is_a_failure() {
    let (_dir, coordinator) = test_coordinator().await;
    let handlers = HandlerRegistry::new();

    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    let task = assigned_task(
        &coordinator,
        TaskSubmission::builder("unknown", json!({}))
            .max_retries(1)
            .build(),
    )
    .await;

    // No handler: reported as a failure; with max_retries 1 it goes
    // straight to the dead-letter queue.
    let outcome = execute_task(coordinator.distributor(), &task, &handlers)
        .await
        .expect("execute");
    assert!(matches!(outcome, CompletionOutcome::DeadLettered { .. }));

    let entries = coordinator.get_dead_letters(10).await.expect("entries");
    assert_eq!(entries.len(), 1);
    assert!(entries[0].error.contains("No handler registered"));
}

#[tokio::test]
async fn test_execute_timeout_is_a_failure() {
    let (_dir, coordinator) = test_coordinator().await;
    let mut handlers = HandlerRegistry::new();
    handlers.register(Box::new(SlowHandler));

    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    let task = assigned_task(
        &coordinator,
        TaskSubmission::builder("slow", json!({}))
            .timeout_ms(20)
            .max_retries(2)
            .build(),
    )
    .await;

    let outcome = execute_task(coordinator.distributor(), &task, &handlers)
        .await
        .expect("execute");
    assert!(matches!(
        outcome,
        CompletionOutcome::RetryScheduled { attempt: 1, .. }
    ));

    let stored = coordinator
        .queue()
        .get(task.id)
        .await
        .expect("get")
        .expect("task");
    assert!(stored
        .last_error
        .as_deref()
        .unwrap_or("")
        .contains("timeout"));
}
