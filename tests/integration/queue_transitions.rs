//! Test: status transitions, compare-and-set assignment, timestamping.

use foreman::{Store, TaskOperationError, TaskQueue, TaskStatus, TaskSubmission};
use serde_json::json;
use uuid::Uuid;

use crate::common::{test_queue, test_store};

#[tokio::test]
async fn test_assign_records_worker_and_time() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    let assigned = queue.assign(task.id, "worker-1").await.expect("assign");
    assert_eq!(assigned.status, TaskStatus::Assigned);
    assert_eq!(assigned.assigned_worker.as_deref(), Some("worker-1"));
    assert!(assigned.assigned_at.is_some());
    assert_eq!(assigned.attempted_workers, vec!["worker-1".to_string()]);
}

#[tokio::test]
async fn test_double_assign_rejected() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    queue.assign(task.id, "worker-1").await.expect("first assign");
    let err = queue
        .assign(task.id, "worker-2")
        .await
        .expect_err("second assign must fail");
    assert!(matches!(err, TaskOperationError::InvalidTransition { .. }));

    // The first assignment is untouched.
    let stored = queue.get(task.id).await.expect("get").expect("task");
    assert_eq!(stored.assigned_worker.as_deref(), Some("worker-1"));
}

#[tokio::test]
async fn test_assign_unknown_task() {
    let (_dir, queue) = test_queue().await;
    let err = queue
        .assign(Uuid::new_v4(), "worker-1")
        .await
        .expect_err("must fail");
    assert!(matches!(err, TaskOperationError::NotFound { .. }));
}

#[tokio::test]
async fn test_update_status_timestamps() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    queue.assign(task.id, "w").await.expect("assign");
    let running = queue
        .update_status(task.id, TaskStatus::Running, None)
        .await
        .expect("running");
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());

    let completed = queue
        .update_status(task.id, TaskStatus::Completed, None)
        .await
        .expect("completed");
    assert!(completed.completed_at.is_some());
}

#[tokio::test]
async fn test_update_status_attaches_error() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    let failed = queue
        .update_status(task.id, TaskStatus::Failed, Some("boom"))
        .await
        .expect("failed");
    assert_eq!(failed.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_terminal_states_are_immutable() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    queue
        .update_status(task.id, TaskStatus::Completed, None)
        .await
        .expect("complete");

    let err = queue
        .update_status(task.id, TaskStatus::Running, None)
        .await
        .expect_err("terminal task must reject transitions");
    assert!(matches!(err, TaskOperationError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_requeue_clears_assignment_fields() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    queue.assign(task.id, "w").await.expect("assign");
    queue
        .update_status(task.id, TaskStatus::Running, None)
        .await
        .expect("running");

    let requeued = queue.requeue(task.id).await.expect("requeue");
    assert_eq!(requeued.status, TaskStatus::Pending);
    assert!(requeued.assigned_worker.is_none());
    assert!(requeued.assigned_at.is_none());
    assert!(requeued.started_at.is_none());

    // The attempt trail survives requeueing.
    assert_eq!(requeued.attempted_workers, vec!["w".to_string()]);
}

#[tokio::test]
async fn test_cancel_before_terminal() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    let cancelled = queue.cancel(task.id).await.expect("cancel");
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // Cancelling a cancelled task is rejected (already terminal).
    let err = queue.cancel(task.id).await.expect_err("must fail");
    assert!(matches!(err, TaskOperationError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_increment_attempt() {
    let (_dir, queue) = test_queue().await;
    let task = queue
        .enqueue(TaskSubmission::new("t", json!({})))
        .await
        .expect("enqueue");

    assert_eq!(queue.increment_attempt(task.id).await.expect("inc"), 1);
    assert_eq!(queue.increment_attempt(task.id).await.expect("inc"), 2);

    let err = queue
        .increment_attempt(Uuid::new_v4())
        .await
        .expect_err("unknown task");
    assert!(matches!(err, TaskOperationError::NotFound { .. }));
}

#[tokio::test]
async fn test_batch_enqueue_visible_together() {
    let (_dir, queue) = test_queue().await;

    let tasks = queue
        .enqueue_batch(vec![
            TaskSubmission::new("a", json!({})),
            TaskSubmission::new("b", json!({})),
            TaskSubmission::new("c", json!({})),
        ])
        .await
        .expect("batch");
    assert_eq!(tasks.len(), 3);

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.pending, 3);
}

#[tokio::test]
async fn test_tasks_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("tasks.db");

    let store = Store::open(&path).await.expect("open");
    let queue = TaskQueue::new(store.clone());
    let task = queue
        .enqueue(TaskSubmission::new("durable", json!({"x": 1})))
        .await
        .expect("enqueue");
    store.close().await;

    let reopened = TaskQueue::new(Store::open(&path).await.expect("reopen"));
    let stored = reopened.get(task.id).await.expect("get").expect("task");
    assert_eq!(stored.task_type, "durable");
    assert_eq!(stored.payload, json!({"x": 1}));
    assert_eq!(stored.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_stats_counts_and_wait() {
    let (_dir, store) = test_store().await;
    let queue = TaskQueue::new(store);

    let a = queue
        .enqueue(TaskSubmission::new("a", json!({})))
        .await
        .expect("enqueue");
    queue
        .enqueue(TaskSubmission::new("b", json!({})))
        .await
        .expect("enqueue");
    queue.assign(a.id, "w").await.expect("assign");

    let stats = queue.stats().await.expect("stats");
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.assigned, 1);
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.dead_letters, 0);
    assert!(stats.avg_wait_ms >= 0.0);
}
