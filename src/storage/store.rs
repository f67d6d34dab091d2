use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, Transaction};

use super::error::StorageError;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    id                    TEXT PRIMARY KEY,
    task_type             TEXT NOT NULL,
    payload               TEXT NOT NULL,
    priority              INTEGER NOT NULL DEFAULT 1,
    status                TEXT NOT NULL DEFAULT 'pending',
    timeout_ms            INTEGER NOT NULL,
    max_retries           INTEGER NOT NULL,
    attempt_count         INTEGER NOT NULL DEFAULT 0,
    base_delay_ms         INTEGER NOT NULL,
    max_delay_ms          INTEGER NOT NULL,
    backoff_factor        REAL NOT NULL,
    required_capabilities TEXT NOT NULL DEFAULT '[]',
    affinity              TEXT,
    assigned_worker       TEXT,
    attempted_workers     TEXT NOT NULL DEFAULT '[]',
    parent_task_id        TEXT,
    metadata              TEXT,
    last_error            TEXT,
    result_id             TEXT,
    created_at            INTEGER NOT NULL,
    assigned_at           INTEGER,
    started_at            INTEGER,
    completed_at          INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tasks_dispatch
    ON tasks (status, priority DESC, created_at ASC);

CREATE TABLE IF NOT EXISTS dead_letters (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id           TEXT NOT NULL,
    task_type         TEXT NOT NULL,
    payload           TEXT NOT NULL,
    metadata          TEXT,
    error             TEXT NOT NULL,
    stack             TEXT,
    retry_count       INTEGER NOT NULL,
    final_status      TEXT NOT NULL,
    attempted_workers TEXT NOT NULL,
    created_at        INTEGER NOT NULL,
    failed_at         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS results (
    task_id   TEXT PRIMARY KEY,
    data      TEXT NOT NULL,
    stored_at INTEGER NOT NULL
);
";

/// Tuning knobs for opening a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Database file location.
    pub path: PathBuf,
    /// Pool size. SQLite allows one writer at a time; readers share.
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl StoreOptions {
    /// Options for a store at the given path with the defaults used by
    /// [`Store::open`].
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the on-disk task store.
///
/// Cheap to clone; all clones share one connection pool. The schema is
/// created on open, so a `Store` pointed at a fresh path is immediately
/// usable and a `Store` reopened on an existing path sees everything the
/// previous process committed.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if missing) the store at `path` with default options.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the database cannot be opened
    /// or the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with(StoreOptions::new(path)).await
    }

    /// Opens the store with explicit options.
    ///
    /// WAL journal mode is always applied: it is what lets statistics and
    /// observability queries read while an assignment transaction writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Configuration`] for invalid options and
    /// [`StorageError::Database`] for connection or schema failures.
    pub async fn open_with(options: StoreOptions) -> Result<Self, StorageError> {
        if options.max_connections == 0 {
            return Err(StorageError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let connect = SqliteConnectOptions::new()
            .filename(&options.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await?;

        let store = Self { pool };
        store.create_schema().await?;

        tracing::debug!(path = %options.path.display(), "task store opened");
        Ok(store)
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        // sqlx executes one statement per call; split the schema blob.
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Returns the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Begins a write transaction.
    ///
    /// Grouped writes (dead-letter insert + task status flip, batch
    /// enqueue) go through here so they land together or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if a connection cannot be
    /// acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    /// Closes the pool. Idempotent; in-flight operations finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
