//! Error types for the sync engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
///
/// Repositories and mappers report failures with this type as well, so the
/// engine can decide whether a failure affects one entity or the whole run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A repository operation failed.
    #[error("repository error: {message}")]
    Repository {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Authentication against a repository failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The remote side is overloaded and asked to back off.
    #[error("remote overloaded: {message}")]
    Overloaded {
        /// Error message.
        message: String,
        /// Earliest time the next run should start, if the remote said so.
        not_before: Option<DateTime<Utc>>,
    },

    /// The run was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Mapping an entity onto the other side failed.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// One of the ids already takes part in a relation.
    #[error("duplicate relation: {0}")]
    DuplicateRelation(String),

    /// Relation data could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] gensync_storage::StorageError),

    /// Relation data could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl SyncError {
    /// Creates a non-retryable repository error.
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable repository error.
    pub fn repository_retryable(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates an overload error with an optional back-off hint.
    pub fn overloaded(message: impl Into<String>, not_before: Option<DateTime<Utc>>) -> Self {
        Self::Overloaded {
            message: message.into(),
            not_before,
        }
    }

    /// Creates a mapping error.
    pub fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    /// Returns true if retrying the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Repository { retryable, .. } => *retryable,
            SyncError::Overloaded { .. } => true,
            _ => false,
        }
    }

    /// Returns true if this error must stop the whole run.
    ///
    /// Everything else only affects the entity being processed.
    pub fn is_run_aborting(&self) -> bool {
        matches!(
            self,
            SyncError::AuthenticationFailed(_)
                | SyncError::Overloaded { .. }
                | SyncError::Cancelled
                | SyncError::Storage(_)
                | SyncError::InvalidConfiguration(_)
        )
    }

    /// Returns the earliest time a scheduler should start the next run.
    pub fn retry_not_before(&self) -> Option<DateTime<Utc>> {
        match self {
            SyncError::Overloaded { not_before, .. } => *not_before,
            _ => None,
        }
    }
}
