//! In-memory state store for testing.

use crate::backend::StateStore;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory state store.
///
/// Suitable for unit tests, integration tests, and profiles that do not need
/// to survive a restart. Saves can be made to fail on demand to exercise the
/// "previous state survives a failed save" path.
///
/// # Example
///
/// ```rust
/// use gensync_storage::{InMemoryStore, StateStore};
///
/// let store = InMemoryStore::new();
/// store.save(b"v1").unwrap();
/// store.fail_next_save();
/// assert!(store.save(b"v2").is_err());
/// assert_eq!(store.load().unwrap().unwrap(), b"v1");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<Option<Vec<u8>>>,
    fail_next_save: AtomicBool,
    saves: AtomicU64,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing content.
    ///
    /// Useful for testing recovery from corrupted state.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(Some(data)),
            ..Self::default()
        }
    }

    /// Makes the next `save` fail without touching the stored blob.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Returns the number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Returns a copy of the stored blob.
    #[must_use]
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.read().clone()
    }
}

impl StateStore for InMemoryStore {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().clone().filter(|d| !d.is_empty()))
    }

    fn save(&self, data: &[u8]) -> StorageResult<()> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Injected("save rejected".into()));
        }
        *self.data.write() = Some(data.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exists(&self) -> bool {
        self.data.read().is_some()
    }
}
