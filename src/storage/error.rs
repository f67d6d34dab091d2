use thiserror::Error;

/// Errors that can occur when interacting with the task store.
///
/// Storage failures are always surfaced to the caller; the queue never
/// retries them transparently.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying database reported an error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to serialize or deserialize a persisted value.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A persisted row held a value the schema does not allow.
    #[error("Corrupt record for {key}: {detail}")]
    Corrupt {
        /// Identifier of the offending row.
        key: String,
        /// What was wrong with it.
        detail: String,
    },

    /// Invalid or unsupported store configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
