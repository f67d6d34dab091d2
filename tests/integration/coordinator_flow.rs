//! Test: end-to-end coordination from submission to stored result.

use foreman::{
    CompletionOutcome, QueueEvent, TaskPriority, TaskStatus, TaskSubmission, WorkerDescriptor,
};
use serde_json::json;

use crate::common::test_coordinator;

#[tokio::test]
async fn test_submit_match_execute_complete() {
    let (_dir, coordinator) = test_coordinator().await;

    let worker_id = coordinator.register_worker(WorkerDescriptor::new("crunch", ["compute"]));
    let task_id = coordinator
        .submit_task(
            TaskSubmission::builder("sum", json!({"n": 42}))
                .required_capabilities(["compute"])
                .build(),
        )
        .await
        .expect("submit");

    // One matching pass binds the task to the worker.
    assert_eq!(coordinator.process_queue().await.expect("match"), 1);
    let task = coordinator
        .queue()
        .get(task_id)
        .await
        .expect("get")
        .expect("task");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_worker.as_deref(), Some(worker_id.as_str()));

    // Worker-side reporting.
    let distributor = coordinator.distributor();
    let started = distributor.start_task(task_id).await.expect("start");
    assert_eq!(started.status, TaskStatus::Running);

    let outcome = distributor
        .complete_task(task_id, true, json!({"result": 84}))
        .await
        .expect("complete");
    assert_eq!(outcome, CompletionOutcome::Completed);

    let result = coordinator
        .get_result(task_id)
        .await
        .expect("get result")
        .expect("result");
    assert_eq!(result.data["result"], json!(84));

    // The worker is idle again with one completion on record.
    let worker = coordinator.registry().get(&worker_id).expect("worker");
    assert!(worker.is_idle());
    assert_eq!(worker.tasks_completed, 1);
}

#[tokio::test]
async fn test_matching_skips_ineligible_workers() {
    let (_dir, coordinator) = test_coordinator().await;

    coordinator.register_worker(WorkerDescriptor::new("cpu", ["cpu"]));
    let task_id = coordinator
        .submit_task(
            TaskSubmission::builder("render", json!({}))
                .required_capabilities(["gpu"])
                .build(),
        )
        .await
        .expect("submit");

    // No eligible worker: nothing assigned, task stays pending.
    assert_eq!(coordinator.process_queue().await.expect("match"), 0);
    let task = coordinator
        .queue()
        .get(task_id)
        .await
        .expect("get")
        .expect("task");
    assert_eq!(task.status, TaskStatus::Pending);

    // A capable worker arrives; the next pass matches.
    coordinator.register_worker(WorkerDescriptor::new("gpu", ["gpu"]));
    assert_eq!(coordinator.process_queue().await.expect("match"), 1);
}

#[tokio::test]
async fn test_matching_prefers_affinity_worker() {
    let (_dir, coordinator) = test_coordinator().await;

    let _other = coordinator.register_worker(WorkerDescriptor::new("a", ["compute"]));
    let preferred = coordinator.register_worker(WorkerDescriptor::new("b", ["compute"]));

    let task_id = coordinator
        .submit_task(
            TaskSubmission::builder("sum", json!({}))
                .required_capabilities(["compute"])
                .affinity(preferred.clone())
                .build(),
        )
        .await
        .expect("submit");

    assert_eq!(coordinator.process_queue().await.expect("match"), 1);
    let task = coordinator
        .queue()
        .get(task_id)
        .await
        .expect("get")
        .expect("task");
    assert_eq!(task.assigned_worker.as_deref(), Some(preferred.as_str()));
}

#[tokio::test]
async fn test_busy_worker_not_double_booked() {
    let (_dir, coordinator) = test_coordinator().await;

    coordinator.register_worker(WorkerDescriptor::new("solo", ["general"]));
    coordinator
        .submit_tasks(vec![
            TaskSubmission::new("one", json!({})),
            TaskSubmission::new("two", json!({})),
        ])
        .await
        .expect("submit");

    // One worker, two tasks: exactly one assignment per pass.
    assert_eq!(coordinator.process_queue().await.expect("match"), 1);
    assert_eq!(coordinator.process_queue().await.expect("match"), 0);

    let health = coordinator.get_health().await.expect("health");
    assert_eq!(health.idle_workers, 0);
    assert_eq!(health.busy_workers, 1);
    assert_eq!(health.queue_depth, 1);
}

#[tokio::test]
async fn test_concurrent_passes_never_double_assign() {
    let (_dir, coordinator) = test_coordinator().await;

    coordinator.register_worker(WorkerDescriptor::new("solo", ["general"]));
    coordinator
        .submit_task(TaskSubmission::new("once", json!({})))
        .await
        .expect("submit");

    let (a, b, c) = tokio::join!(
        coordinator.process_queue(),
        coordinator.process_queue(),
        coordinator.process_queue(),
    );
    let total = a.expect("pass a") + b.expect("pass b") + c.expect("pass c");
    assert_eq!(total, 1, "the task must be assigned exactly once");
}

#[tokio::test]
async fn test_deregistered_worker_not_matched() {
    let (_dir, coordinator) = test_coordinator().await;

    let worker_id = coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    coordinator
        .submit_task(TaskSubmission::new("t", json!({})))
        .await
        .expect("submit");

    coordinator.deregister_worker(&worker_id).expect("deregister");
    assert_eq!(coordinator.process_queue().await.expect("match"), 0);
}

#[tokio::test]
async fn test_progress_reporting() {
    let (_dir, coordinator) = test_coordinator().await;

    let progress = coordinator.get_progress().await.expect("progress");
    assert_eq!(progress.total, 0);
    assert_eq!(progress.percent_complete, 0.0);

    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    let ids = coordinator
        .submit_tasks(vec![
            TaskSubmission::new("a", json!({})),
            TaskSubmission::new("b", json!({})),
        ])
        .await
        .expect("submit");

    coordinator.process_queue().await.expect("match");
    let distributor = coordinator.distributor();
    distributor.start_task(ids[0]).await.expect("start");
    distributor
        .complete_task(ids[0], true, json!({}))
        .await
        .expect("complete");

    let progress = coordinator.get_progress().await.expect("progress");
    assert_eq!(progress.total, 2);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.pending, 1);
    assert!((progress.percent_complete - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_lifecycle_events_follow_the_task() {
    let (_dir, coordinator) = test_coordinator().await;
    coordinator.start();
    let mut events = coordinator.subscribe();

    let worker_id = coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    let task_id = coordinator
        .submit_task(
            TaskSubmission::builder("observed", json!({}))
                .priority(TaskPriority::High)
                .build(),
        )
        .await
        .expect("submit");

    match events.recv().await.expect("enqueued event") {
        QueueEvent::TaskEnqueued {
            task_id: id,
            task_type,
            priority,
        } => {
            assert_eq!(id, task_id);
            assert_eq!(task_type, "observed");
            assert_eq!(priority, TaskPriority::High);
        }
        other => panic!("expected TaskEnqueued, got {other:?}"),
    }

    // The started poll loop performs the assignment.
    match events.recv().await.expect("assigned event") {
        QueueEvent::TaskAssigned {
            task_id: id,
            worker_id: wid,
        } => {
            assert_eq!(id, task_id);
            assert_eq!(wid, worker_id);
        }
        other => panic!("expected TaskAssigned, got {other:?}"),
    }

    let distributor = coordinator.distributor();
    distributor.start_task(task_id).await.expect("start");
    distributor
        .complete_task(task_id, true, json!({}))
        .await
        .expect("complete");

    match events.recv().await.expect("completed event") {
        QueueEvent::TaskCompleted { task_id: id } => assert_eq!(id, task_id),
        other => panic!("expected TaskCompleted, got {other:?}"),
    }

    coordinator.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_silences_events() {
    let (_dir, coordinator) = test_coordinator().await;

    coordinator.start();
    assert!(coordinator.is_running());
    // Starting twice is a no-op.
    coordinator.start();

    coordinator.stop().await;
    coordinator.stop().await;
    assert!(!coordinator.is_running());

    // After stop, submissions still work but announce nothing.
    let mut events = coordinator.subscribe();
    coordinator
        .submit_task(TaskSubmission::new("quiet", json!({})))
        .await
        .expect("submit");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_dead_letter_retry_reenters_matching() {
    let (_dir, coordinator) = test_coordinator().await;

    let task_id = coordinator
        .submit_task(TaskSubmission::new("doomed", json!({"x": 1})))
        .await
        .expect("submit");
    coordinator
        .queue()
        .move_to_dead_letter(task_id, "forced", None)
        .await
        .expect("move");

    let entries = coordinator.get_dead_letters(10).await.expect("entries");
    let new_id = coordinator
        .retry_dead_letter(entries[0].id)
        .await
        .expect("retry")
        .expect("new task");

    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    assert_eq!(coordinator.process_queue().await.expect("match"), 1);
    let task = coordinator
        .queue()
        .get(new_id)
        .await
        .expect("get")
        .expect("task");
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.payload, json!({"x": 1}));
}

#[tokio::test]
async fn test_cancel_through_coordinator() {
    let (_dir, coordinator) = test_coordinator().await;

    let task_id = coordinator
        .submit_task(TaskSubmission::new("t", json!({})))
        .await
        .expect("submit");
    let cancelled = coordinator.cancel_task(task_id).await.expect("cancel");
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    // Cancelled tasks are invisible to matching.
    coordinator.register_worker(WorkerDescriptor::new("w", ["general"]));
    assert_eq!(coordinator.process_queue().await.expect("match"), 0);
}
