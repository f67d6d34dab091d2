//! Test: capability-filtered dequeue uses exact-subset semantics.

use foreman::{TaskPriority, TaskSubmission};
use serde_json::json;

use crate::common::test_queue;

fn caps(tags: &[&str]) -> Vec<String> {
    tags.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn test_subset_match() {
    let (_dir, queue) = test_queue().await;

    queue
        .enqueue(
            TaskSubmission::builder("gpu_job", json!({}))
                .required_capabilities(["gpu", "cuda"])
                .build(),
        )
        .await
        .expect("enqueue");

    // Caller missing one required tag gets nothing.
    assert!(queue
        .dequeue_with_capabilities(&caps(&["gpu"]))
        .await
        .expect("dequeue")
        .is_none());

    // Caller with a superset matches.
    let task = queue
        .dequeue_with_capabilities(&caps(&["gpu", "cuda", "net"]))
        .await
        .expect("dequeue")
        .expect("match");
    assert_eq!(task.task_type, "gpu_job");
}

#[tokio::test]
async fn test_empty_requirement_matches_any_caller() {
    let (_dir, queue) = test_queue().await;

    queue
        .enqueue(TaskSubmission::new("plain", json!({})))
        .await
        .expect("enqueue");

    let task = queue
        .dequeue_with_capabilities(&[])
        .await
        .expect("dequeue")
        .expect("match");
    assert_eq!(task.task_type, "plain");
}

#[tokio::test]
async fn test_no_match_does_not_mutate() {
    let (_dir, queue) = test_queue().await;

    let task = queue
        .enqueue(
            TaskSubmission::builder("gpu_job", json!({}))
                .required_capabilities(["gpu"])
                .build(),
        )
        .await
        .expect("enqueue");

    assert!(queue
        .dequeue_with_capabilities(&caps(&["cpu"]))
        .await
        .expect("dequeue")
        .is_none());

    // The task is still pending and unassigned.
    let stored = queue.get(task.id).await.expect("get").expect("task");
    assert_eq!(stored.status, foreman::TaskStatus::Pending);
    assert!(stored.assigned_worker.is_none());
}

#[tokio::test]
async fn test_filter_skips_to_first_eligible() {
    let (_dir, queue) = test_queue().await;

    // Highest-priority task requires a capability the caller lacks; the
    // filtered dequeue must return the next eligible task, not nothing.
    queue
        .enqueue(
            TaskSubmission::builder("locked", json!({}))
                .priority(TaskPriority::Urgent)
                .required_capabilities(["gpu"])
                .build(),
        )
        .await
        .expect("enqueue");
    let eligible = queue
        .enqueue(TaskSubmission::new("open", json!({})))
        .await
        .expect("enqueue");

    let task = queue
        .dequeue_with_capabilities(&caps(&["cpu"]))
        .await
        .expect("dequeue")
        .expect("match");
    assert_eq!(task.id, eligible.id);
}
