//! Test fixtures for synchronization scenarios.
//!
//! A [`SyncFixture`] owns both repositories and the relation store so tests
//! can run several synchronizations against the same state and inspect the
//! result in between.

use crate::entities::{
    contact_repository, person_contact_matcher, person_repository, Contact, ContactRepository,
    Person, PersonContactMapper, PersonRepository,
};
use gensync_engine::{RelationRecord, RelationStore, SyncConfig, Synchronizer, RELATIONS_FILE_NAME};
use gensync_storage::{FileStore, InMemoryStore, StateStore};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Relation record between a `Person` and a `Contact`.
pub type PersonContactRecord = RelationRecord<u32, u64, String, u64>;

/// Synchronizer over the sample repositories.
pub type PersonContactSynchronizer =
    Synchronizer<PersonRepository, ContactRepository, PersonContactMapper>;

/// Two repositories and a relation store with automatic cleanup.
pub struct SyncFixture {
    /// A-side repository.
    pub people: Arc<PersonRepository>,
    /// B-side repository.
    pub contacts: Arc<ContactRepository>,
    /// Relation store shared by all synchronizers of this fixture.
    pub store: Arc<dyn StateStore>,
    relations_path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl SyncFixture {
    /// Creates a fixture with an in-memory relation store.
    pub fn memory() -> Self {
        Self {
            people: Arc::new(person_repository()),
            contacts: Arc::new(contact_repository()),
            store: Arc::new(InMemoryStore::new()),
            relations_path: None,
            _temp_dir: None,
        }
    }

    /// Creates a fixture whose relations are written to a temporary file.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::in_dir(temp_dir.path(), None, RELATIONS_FILE_NAME);
        let relations_path = store.path().to_path_buf();

        Self {
            people: Arc::new(person_repository()),
            contacts: Arc::new(contact_repository()),
            store: Arc::new(store),
            relations_path: Some(relations_path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the relations file path if file-based, None if in-memory.
    pub fn relations_path(&self) -> Option<&PathBuf> {
        self.relations_path.as_ref()
    }

    /// Creates a synchronizer over the fixture's repositories with the
    /// name-and-age matcher installed.
    pub fn synchronizer(&self, config: SyncConfig) -> PersonContactSynchronizer {
        Synchronizer::new(
            config,
            Arc::clone(&self.people),
            Arc::clone(&self.contacts),
            PersonContactMapper,
            Arc::clone(&self.store),
        )
        .with_matcher(person_contact_matcher())
    }

    /// Loads the persisted relations, sorted by A-side id.
    pub fn records(&self) -> Vec<PersonContactRecord> {
        let mut records: Vec<PersonContactRecord> = RelationStore::new(Arc::clone(&self.store))
            .load()
            .expect("Failed to load relations")
            .unwrap_or_default();
        records.sort_by_key(|r| r.a_id);
        records
    }

    /// Returns the B-side id related to `a_id`, if any.
    pub fn related_contact(&self, a_id: u32) -> Option<String> {
        self.records()
            .into_iter()
            .find(|r| r.a_id == a_id)
            .map(|r| r.b_id)
    }

    /// Overwrites the relations with bytes that are not a relations file.
    pub fn corrupt_relations(&self) {
        self.store
            .save(b"definitely not a relations file")
            .expect("Failed to corrupt relations");
    }

    /// Seeds a matching scenario: three people on A and three contacts on B
    /// of which only Marge agrees on name and age.
    ///
    /// Returns the ids of Homer, Marge and Bart on A and of the three
    /// contacts on B.
    pub fn seed_family(&self) -> ([u32; 3], [String; 3]) {
        let people = [
            self.people.insert(Person::new("Homer", 39)),
            self.people.insert(Person::new("Marge", 36)),
            self.people.insert(Person::new("Bart", 10)),
        ];
        let contacts = [
            self.contacts.insert(Contact::new("Homer", "40")),
            self.contacts.insert(Contact::new("Marge", "36")),
            self.contacts.insert(Contact::new("Lisa", "8")),
        ];
        (people, contacts)
    }
}

impl std::fmt::Debug for SyncFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncFixture")
            .field("people", &self.people.len())
            .field("contacts", &self.contacts.len())
            .field("relations_path", &self.relations_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_fixture_starts_empty() {
        let fx = SyncFixture::memory();
        assert!(fx.people.is_empty());
        assert!(fx.contacts.is_empty());
        assert!(fx.records().is_empty());
        assert!(fx.relations_path().is_none());
    }

    #[test]
    fn file_fixture_has_relations_path() {
        let fx = SyncFixture::file();
        let path = fx.relations_path().unwrap();
        assert!(path.ends_with(RELATIONS_FILE_NAME));
        assert!(!path.exists());
    }

    #[test]
    fn corrupted_relations_load_as_empty() {
        let fx = SyncFixture::memory();
        fx.corrupt_relations();
        assert!(fx.store.exists());
        assert!(fx.records().is_empty());
    }

    #[test]
    fn seed_family_fills_both_sides() {
        let fx = SyncFixture::memory();
        let (people, contacts) = fx.seed_family();
        assert_eq!(fx.people.len(), 3);
        assert_eq!(fx.contacts.len(), 3);
        assert_eq!(fx.people.entity(&people[1]).unwrap().name, "Marge");
        assert_eq!(fx.contacts.entity(&contacts[2]).unwrap().display_name, "Lisa");
    }
}
