//! Error types for the sync queue.

use thiserror::Error;

/// Errors surfaced to callers of the sync queue.
///
/// Per-record delivery failures never appear here; they are absorbed into the
/// record's retry count and status. Only structural failures do.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The backing store could not be opened, read or written.
    #[error("Database error: {0}")]
    Database(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration or filesystem layout problem.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The background drain worker failed to start or stop.
    #[error("Worker error: {0}")]
    Worker(String),
}

impl SyncError {
    /// Check if this error means the store itself is unusable.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Serialization(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
