//! Shared helpers for integration tests.

use foreman::{Coordinator, Store, TaskQueue};
use tempfile::TempDir;

/// Opens a store on a scratch database.
///
/// The `TempDir` must be kept alive for the duration of the test; dropping
/// it deletes the database file.
pub async fn test_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let store = Store::open(dir.path().join("tasks.db"))
        .await
        .expect("open store");
    (dir, store)
}

/// A queue over a scratch store.
pub async fn test_queue() -> (TempDir, TaskQueue) {
    let (dir, store) = test_store().await;
    (dir, TaskQueue::new(store))
}

/// A coordinator over a scratch store.
pub async fn test_coordinator() -> (TempDir, Coordinator) {
    let (dir, store) = test_store().await;
    (dir, Coordinator::new(store))
}
