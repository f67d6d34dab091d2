//! foreman - Embedded Task Coordination
//!
//! A durable, priority-ordered work queue plus a coordinator that assigns
//! tasks to registered workers, tracks their lifecycle, and recovers from
//! failure via retry policies and a dead-letter queue. State lives in a
//! SQLite database (WAL mode); workers are in-process and register through
//! the coordinator. No wire protocol and no message broker. Just an embedded
//! library with a precise state-transition contract.
//!
//! ```no_run
//! use foreman::{Coordinator, Store, TaskSubmission, WorkerDescriptor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open("tasks.db").await?;
//! let coordinator = Coordinator::new(store);
//!
//! let worker_id = coordinator.register_worker(WorkerDescriptor::new("crunch", ["compute"]));
//! let task_id = coordinator
//!     .submit_task(
//!         TaskSubmission::builder("sum", serde_json::json!({"n": 42}))
//!             .required_capabilities(["compute"])
//!             .build(),
//!     )
//!     .await?;
//!
//! coordinator.process_queue().await?;
//!
//! // Worker-side reporting:
//! let distributor = coordinator.distributor();
//! distributor.start_task(task_id).await?;
//! distributor
//!     .complete_task(task_id, true, serde_json::json!({"result": 84}))
//!     .await?;
//! # let _ = worker_id;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod distributor;
pub mod events;
pub mod models;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod worker;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, Health, Progress};
pub use distributor::{CompletionOutcome, Distributor};
pub use events::{Bus, QueueEvent};
pub use models::{
    DeadLetterEntry, RetryPolicy, Task, TaskPriority, TaskResult, TaskStatus, TaskSubmission,
    WorkerDescriptor, WorkerInfo,
};
pub use queue::{QueueStats, TaskOperationError, TaskQueue};
pub use registry::WorkerRegistry;
pub use storage::{StorageError, Store, StoreOptions};
pub use worker::{execute_task, HandlerRegistry, TaskHandler};
