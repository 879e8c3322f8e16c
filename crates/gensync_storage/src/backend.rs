//! State store trait definition.

use crate::error::StorageResult;

/// A store for one opaque state blob, such as the relation data of a
/// synchronization profile.
///
/// # Invariants
///
/// - `load` returns exactly the bytes of the last successful `save`
/// - `load` returns `None` when nothing has been saved yet
/// - A failing `save` leaves the previously saved blob intact
/// - Stores must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait StateStore: Send + Sync {
    /// Loads the stored blob.
    ///
    /// Returns `None` if nothing was saved yet, or the stored blob is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob exists but cannot be read.
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the stored blob with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob could not be written completely. In that
    /// case the previous blob is still returned by `load`.
    fn save(&self, data: &[u8]) -> StorageResult<()>;

    /// Returns true if a blob has been saved.
    fn exists(&self) -> bool;
}
