//! File-based state store for persistent profiles.

use crate::backend::StateStore;
use crate::error::{StorageError, StorageResult};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Suffix of the temporary file used for atomic writes.
const TEMP_SUFFIX: &str = ".tmp";

/// A file-based state store.
///
/// The blob survives process restarts. Saves use the write-then-rename
/// pattern so the existing file is only replaced once the new content is
/// completely on disk:
///
/// 1. Write to `<file>.tmp`
/// 2. Sync the temporary file to disk
/// 3. Rename the temporary file over `<file>`
/// 4. Fsync the directory so the rename itself is durable
///
/// # Example
///
/// ```no_run
/// use gensync_storage::{FileStore, StateStore};
/// use std::path::Path;
///
/// let store = FileStore::in_dir(Path::new("profiles"), Some("work"), "relations.cbor");
/// store.save(b"state").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Creates a store backed by the file at `path`.
    ///
    /// The file is not touched until the first `load` or `save`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store for a file inside `dir`.
    ///
    /// With a prefix the file is named `{prefix}_{file_name}`, so several
    /// profiles can share one directory.
    pub fn in_dir(dir: &Path, prefix: Option<&str>, file_name: &str) -> Self {
        let name = match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}_{file_name}"),
            _ => file_name.to_string(),
        };
        Self::new(dir.join(name))
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> StorageResult<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(self.path.clone()))?;
        let mut temp_name = OsString::from(file_name);
        temp_name.push(TEMP_SUFFIX);
        Ok(self.path.with_file_name(temp_name))
    }

    /// Syncs the parent directory so a completed rename survives a crash.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

impl StateStore for FileStore {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn save(&self, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.temp_path()?;
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()?;

        debug!(path = %self.path.display(), bytes = data.len(), "state file saved");
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("relations.cbor"));

        assert!(store.load().unwrap().is_none());
        assert!(!store.exists());
    }

    #[test]
    fn file_save_and_load() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("relations.cbor"));

        store.save(b"hello world").unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap().unwrap(), b"hello world");
    }

    #[test]
    fn file_save_replaces_previous_content() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("relations.cbor"));

        store.save(b"a much longer first version").unwrap();
        store.save(b"short").unwrap();
        assert_eq!(store.load().unwrap().unwrap(), b"short");
    }

    #[test]
    fn file_persistence_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relations.cbor");

        FileStore::new(&path).save(b"persistent data").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.load().unwrap().unwrap(), b"persistent data");
    }

    #[test]
    fn file_empty_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relations.cbor");
        fs::write(&path, b"").unwrap();

        assert!(FileStore::new(&path).load().unwrap().is_none());
    }

    #[test]
    fn file_failed_save_keeps_previous_blob() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("relations.cbor"));
        store.save(b"good state").unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(dir.path().join("relations.cbor.tmp")).unwrap();

        assert!(store.save(b"new state").is_err());
        assert_eq!(store.load().unwrap().unwrap(), b"good state");
    }

    #[test]
    fn file_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("path").join("state"));

        store.save(b"x").unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn file_profile_naming() {
        let dir = Path::new("profiles");

        let plain = FileStore::in_dir(dir, None, "relations.cbor");
        assert_eq!(plain.path(), dir.join("relations.cbor"));

        let prefixed = FileStore::in_dir(dir, Some("work"), "relations.cbor");
        assert_eq!(prefixed.path(), dir.join("work_relations.cbor"));

        let empty = FileStore::in_dir(dir, Some(""), "relations.cbor");
        assert_eq!(empty.path(), dir.join("relations.cbor"));
    }

    #[test]
    fn file_no_temp_left_behind() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("relations.cbor"));
        store.save(b"data").unwrap();

        assert!(!dir.path().join("relations.cbor.tmp").exists());
    }
}
