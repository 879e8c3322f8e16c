//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No relations were persisted for the profile.
    #[error("no relations found at {0:?}")]
    NoRelations(PathBuf),

    /// The relations file failed verification.
    #[error("verification failed with {0} problem(s)")]
    VerificationFailed(usize),

    /// A directory to synchronize does not exist.
    #[error("not a directory: {0:?}")]
    NotADirectory(PathBuf),

    /// Both sides point to the same directory.
    #[error("both sides point to {0:?}")]
    SameDirectory(PathBuf),

    /// The synchronization run failed.
    #[error(transparent)]
    Sync(#[from] gensync_engine::SyncError),

    /// Reading or writing state failed.
    #[error(transparent)]
    Storage(#[from] gensync_storage::StorageError),
}
