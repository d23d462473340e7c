//! Error types for credits storage.

use canvas_credits_core::CreditsError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The transaction lost a lock race or timed out waiting; safe to retry.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The identifier looked up.
        id: String,
    },

    /// Domain validation or balance arithmetic failed.
    #[error(transparent)]
    Credits(#[from] CreditsError),
}

impl StoreError {
    /// Whether the operation may succeed if retried unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            rocksdb::ErrorKind::Busy
            | rocksdb::ErrorKind::TimedOut
            | rocksdb::ErrorKind::TryAgain => Self::Conflict(err.to_string()),
            _ => Self::Database(err.to_string()),
        }
    }
}
