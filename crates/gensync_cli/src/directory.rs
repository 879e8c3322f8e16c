//! Directory-backed repository.
//!
//! Every regular file directly inside the directory is an entity. The file
//! name is the id and the SHA-256 of the content is the version, so any
//! change of content is detected regardless of timestamps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gensync_engine::{
    EntityInitializer, EntityModifier, EntityRepository, EntityVersion, PropertyMatchRules,
    QueryRange, SyncError, SyncResult,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// A file loaded from a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntity {
    /// File name.
    pub name: String,
    /// File content.
    pub content: Vec<u8>,
    /// Last modification time reported by the file system.
    pub modified: Option<DateTime<Utc>>,
}

/// Returns the hex SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    Sha256::digest(content)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Repository over the files of one directory.
#[derive(Debug, Clone)]
pub struct DirectoryRepository {
    root: PathBuf,
}

impl DirectoryRepository {
    /// Creates a repository for `root`; the directory must exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn read(&self, name: &str) -> SyncResult<Option<FileEntity>> {
        let path = self.path(name);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let modified = fs::metadata(&path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from);
        Ok(Some(FileEntity {
            name: name.to_string(),
            content,
            modified,
        }))
    }

    async fn write(&self, name: &str, content: &[u8]) -> SyncResult<()> {
        let path = self.path(name);
        fs::write(&path, content)
            .await
            .map_err(|e| io_error(&path, e))
    }

    /// Picks `name`, or `stem-1.ext`, `stem-2.ext`, ... if it is taken.
    async fn free_name(&self, name: &str) -> SyncResult<String> {
        let (stem, extension) = match name.rsplit_once('.') {
            Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
            _ => (name, None),
        };
        let mut candidate = name.to_string();
        let mut n = 0u32;
        loop {
            let path = self.path(&candidate);
            match fs::try_exists(&path).await {
                Ok(false) => return Ok(candidate),
                Ok(true) => {}
                Err(e) => return Err(io_error(&path, e)),
            }
            n += 1;
            candidate = match extension {
                Some(extension) => format!("{stem}-{n}.{extension}"),
                None => format!("{stem}-{n}"),
            };
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> SyncError {
    let message = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            SyncError::repository_retryable(message)
        }
        _ => SyncError::repository(message),
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

#[async_trait]
impl EntityRepository for DirectoryRepository {
    type Id = String;
    type Version = String;
    type Entity = FileEntity;

    async fn get_versions(
        &self,
        range: QueryRange,
        known: &[String],
    ) -> SyncResult<Vec<EntityVersion<String, String>>> {
        let known: HashSet<&String> = known.iter().collect();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let mut versions = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_valid_name(&name) {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| io_error(&entry.path(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(file) = self.read(&name).await? else {
                continue;
            };
            let in_range = file.modified.map_or(true, |at| range.contains(at));
            if !in_range && !known.contains(&name) {
                continue;
            }
            versions.push(EntityVersion::new(name, content_hash(&file.content)));
        }
        debug!(root = %self.root.display(), files = versions.len(), "directory scanned");
        Ok(versions)
    }

    async fn get(&self, ids: &[String]) -> SyncResult<Vec<(String, FileEntity)>> {
        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(file) = self.read(id).await? {
                loaded.push((id.clone(), file));
            }
        }
        Ok(loaded)
    }

    async fn create(
        &self,
        initializer: EntityInitializer<'_, FileEntity>,
    ) -> SyncResult<EntityVersion<String, String>> {
        let file = initializer(FileEntity::default())?;
        if !is_valid_name(&file.name) {
            return Err(SyncError::mapping(format!("invalid file name {:?}", file.name)));
        }
        let name = self.free_name(&file.name).await?;
        self.write(&name, &file.content).await?;
        Ok(EntityVersion::new(name, content_hash(&file.content)))
    }

    async fn try_update(
        &self,
        id: &String,
        expected: &String,
        current: FileEntity,
        modifier: EntityModifier<'_, FileEntity>,
    ) -> SyncResult<Option<EntityVersion<String, String>>> {
        match self.read(id).await? {
            Some(file) if content_hash(&file.content) == *expected => {}
            _ => return Ok(None),
        }
        let updated = modifier(current)?;
        self.write(id, &updated.content).await?;
        Ok(Some(EntityVersion::new(
            id.clone(),
            content_hash(&updated.content),
        )))
    }

    async fn try_delete(&self, id: &String, expected: &String) -> SyncResult<bool> {
        match self.read(id).await? {
            Some(file) if content_hash(&file.content) == *expected => {}
            _ => return Ok(false),
        }
        let path = self.path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    fn last_modified(&self, entity: &FileEntity) -> Option<DateTime<Utc>> {
        entity.modified
    }
}

/// Pairs files with the same name and content.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameFileRules;

impl PropertyMatchRules<FileEntity, FileEntity> for SameFileRules {
    type AKey = String;
    type BKey = String;

    fn a_property(&self, entity: &FileEntity) -> String {
        entity.name.clone()
    }

    fn b_property(&self, entity: &FileEntity) -> String {
        entity.name.clone()
    }

    fn map_a_property_to_b(&self, key: &String) -> String {
        key.clone()
    }

    fn are_equal(&self, a: &FileEntity, b: &FileEntity) -> bool {
        a.content == b.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn repo() -> (TempDir, DirectoryRepository) {
        let dir = TempDir::new().unwrap();
        let repo = DirectoryRepository::new(dir.path());
        (dir, repo)
    }

    fn file(name: &str, content: &str) -> FileEntity {
        FileEntity {
            name: name.into(),
            content: content.as_bytes().to_vec(),
            modified: None,
        }
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn versions_cover_regular_visible_files() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let versions = repo.get_versions(QueryRange::unbounded(), &[]).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id, "a.txt");
        assert_eq!(versions[0].version, content_hash(b"alpha"));
    }

    #[tokio::test]
    async fn bounded_range_still_reports_known_files() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        let future = QueryRange {
            from: Some(Utc::now() + chrono::Duration::hours(1)),
            to: None,
        };

        assert!(repo.get_versions(future, &[]).await.unwrap().is_empty());
        let versions = repo.get_versions(future, &["b.txt".to_string()]).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].id, "b.txt");
    }

    #[tokio::test]
    async fn create_avoids_existing_names() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("a.txt"), "taken").unwrap();

        let created = repo
            .create(Box::new(|_: FileEntity| Ok(file("a.txt", "new"))))
            .await
            .unwrap();
        assert_eq!(created.id, "a-1.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("a-1.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn create_rejects_paths() {
        let (_dir, repo) = repo();
        let err = repo
            .create(Box::new(|_: FileEntity| Ok(file("../escape", "x"))))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Mapping(_)));
    }

    #[tokio::test]
    async fn update_checks_expected_hash() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        let stale = content_hash(b"zero");
        let current = content_hash(b"one");

        let rejected = repo
            .try_update(
                &"a.txt".to_string(),
                &stale,
                file("a.txt", "one"),
                Box::new(|_: FileEntity| Ok(file("a.txt", "two"))),
            )
            .await
            .unwrap();
        assert!(rejected.is_none());

        let updated = repo
            .try_update(
                &"a.txt".to_string(),
                &current,
                file("a.txt", "one"),
                Box::new(|_: FileEntity| Ok(file("a.txt", "two"))),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, content_hash(b"two"));
    }

    #[tokio::test]
    async fn delete_of_missing_file_reports_false() {
        let (dir, repo) = repo();
        std::fs::write(dir.path().join("a.txt"), "one").unwrap();
        let hash = content_hash(b"one");

        assert!(repo.try_delete(&"a.txt".to_string(), &hash).await.unwrap());
        assert!(!repo.try_delete(&"a.txt".to_string(), &hash).await.unwrap());
    }

    #[test]
    fn same_file_rules_compare_content() {
        let rules = SameFileRules;
        assert!(rules.are_equal(&file("a", "x"), &file("a", "x")));
        assert!(!rules.are_equal(&file("a", "x"), &file("a", "y")));
    }
}
