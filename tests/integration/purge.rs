//! Test: age-based retention sweep.

use foreman::{Bus, Distributor, TaskStatus, TaskSubmission, WorkerRegistry};
use serde_json::json;

use crate::common::test_queue;

#[tokio::test]
async fn test_purge_removes_terminal_tasks_once() {
    let (_dir, queue) = test_queue().await;

    let completed = queue
        .enqueue(TaskSubmission::new("done", json!({})))
        .await
        .expect("enqueue");
    queue
        .update_status(completed.id, TaskStatus::Completed, None)
        .await
        .expect("complete");

    let cancelled = queue
        .enqueue(TaskSubmission::new("gone", json!({})))
        .await
        .expect("enqueue");
    queue.cancel(cancelled.id).await.expect("cancel");

    let pending = queue
        .enqueue(TaskSubmission::new("alive", json!({})))
        .await
        .expect("enqueue");

    // Threshold 0: everything terminal goes, exactly once.
    let removed = queue.purge_completed(0).await.expect("purge");
    assert_eq!(removed, 2);
    let removed = queue.purge_completed(0).await.expect("purge again");
    assert_eq!(removed, 0);

    // Non-terminal tasks are untouched.
    assert!(queue.get(pending.id).await.expect("get").is_some());
    assert!(queue.get(completed.id).await.expect("get").is_none());
    assert!(queue.get(cancelled.id).await.expect("get").is_none());
}

#[tokio::test]
async fn test_purge_respects_age_threshold() {
    let (_dir, queue) = test_queue().await;

    let task = queue
        .enqueue(TaskSubmission::new("done", json!({})))
        .await
        .expect("enqueue");
    queue
        .update_status(task.id, TaskStatus::Completed, None)
        .await
        .expect("complete");

    // Completed moments ago; a one-hour threshold keeps it.
    let removed = queue.purge_completed(3_600_000).await.expect("purge");
    assert_eq!(removed, 0);
    assert!(queue.get(task.id).await.expect("get").is_some());
}

#[tokio::test]
async fn test_purge_removes_stored_results() {
    let (_dir, queue) = test_queue().await;
    let distributor = Distributor::new(queue.clone(), WorkerRegistry::new(), Bus::new(16));

    let task = queue
        .enqueue(TaskSubmission::new("sum", json!({})))
        .await
        .expect("enqueue");
    queue.assign(task.id, "w").await.expect("assign");
    distributor.start_task(task.id).await.expect("start");
    distributor
        .complete_task(task.id, true, json!({"result": 1}))
        .await
        .expect("complete");

    assert!(distributor
        .get_result(task.id)
        .await
        .expect("result")
        .is_some());

    assert_eq!(queue.purge_completed(0).await.expect("purge"), 1);
    assert!(distributor
        .get_result(task.id)
        .await
        .expect("result")
        .is_none());
}

#[tokio::test]
async fn test_purge_leaves_failed_tasks() {
    let (_dir, queue) = test_queue().await;

    let task = queue
        .enqueue(TaskSubmission::new("failed", json!({})))
        .await
        .expect("enqueue");
    queue
        .move_to_dead_letter(task.id, "err", None)
        .await
        .expect("move");

    // Failed tasks are audit state, not purge targets.
    assert_eq!(queue.purge_completed(0).await.expect("purge"), 0);
    assert!(queue.get(task.id).await.expect("get").is_some());
}
