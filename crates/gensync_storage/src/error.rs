//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The configured path cannot hold a state file.
    #[error("invalid state path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// A simulated failure, only produced by test stores.
    #[error("injected failure: {0}")]
    Injected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StorageError::InvalidPath(PathBuf::from("/"));
        assert_eq!(err.to_string(), "invalid state path: /");

        let err = StorageError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(err.to_string().contains("disk full"));
    }
}
