//! Durable storage for tasks, results and dead-letter entries.
//!
//! Backed by SQLite in WAL mode: readers proceed concurrently with a single
//! writer, and multi-statement operations run inside transactions so partial
//! writes never become visible.

mod error;
mod store;

pub use error::StorageError;
pub use store::{Store, StoreOptions};
