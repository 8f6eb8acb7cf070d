use thiserror::Error;

use crate::sync::types::SyncErrorKind;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OfflineError>;

// ============================================================================
// StorageError
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Corrupt entry {collection}/{key}: {message}")]
    Corrupt {
        collection: &'static str,
        key: String,
        message: String,
    },
}

// ============================================================================
// RemoteError
// ============================================================================

/// Failure of a single remote call. Never retried by the dispatcher itself.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Remote rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Mutation cannot be dispatched: {0}")]
    InvalidMutation(String),
}

impl RemoteError {
    /// Classify the failure for the retry policy.
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            RemoteError::Network(_) | RemoteError::Timeout(_) => SyncErrorKind::Transient,
            RemoteError::Rejected { status, .. } => match *status {
                408 | 429 => SyncErrorKind::Transient,
                s if s >= 500 => SyncErrorKind::Transient,
                _ => SyncErrorKind::Permanent,
            },
            RemoteError::InvalidMutation(_) => SyncErrorKind::Permanent,
        }
    }
}

// ============================================================================
// OfflineError
// ============================================================================

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Sync queue is full ({limit} pending mutations)")]
    QueueFull { limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Entity type {0} has no local cache collection")]
    UnknownEntity(String),

    #[error("No {what} with id {id}")]
    NotFound { what: &'static str, id: String },
}

impl OfflineError {
    /// True when the local store cannot be opened, read or written.
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            OfflineError::Storage(StorageError::Unavailable(_)) => true,
            #[cfg(feature = "sqlite")]
            OfflineError::Storage(StorageError::Sqlite(_)) => true,
            _ => false,
        }
    }
}
