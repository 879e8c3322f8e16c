//! Sample entities for both sides.
//!
//! The A-side holds `Person`s with numeric ids and ages; the B-side holds
//! `Contact`s with string ids and the age stored as text. The mismatch is
//! deliberate: mapping and matching have to convert between the two.

use chrono::{DateTime, Utc};
use gensync_engine::{
    EntityMapper, InMemoryRepository, PropertyMatchRules, PropertyMatcher, SyncContext, SyncError,
    SyncResult,
};
use serde::{Deserialize, Serialize};

/// A-side sample entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Full name.
    pub name: String,
    /// Age in years.
    pub age: u32,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

impl Person {
    /// Creates a person without modification time.
    pub fn new(name: impl Into<String>, age: u32) -> Self {
        Self {
            name: name.into(),
            age,
            modified: None,
        }
    }

    /// Sets the modification time.
    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified = Some(at);
        self
    }
}

/// B-side sample entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Name as displayed by the address book.
    pub display_name: String,
    /// Age as free text.
    pub age: String,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

impl Contact {
    /// Creates a contact without modification time.
    pub fn new(display_name: impl Into<String>, age: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            age: age.into(),
            modified: None,
        }
    }

    /// Sets the modification time.
    pub fn modified_at(mut self, at: DateTime<Utc>) -> Self {
        self.modified = Some(at);
        self
    }
}

/// A-side repository: `u32` ids.
pub type PersonRepository = InMemoryRepository<u32, Person>;

/// B-side repository: `String` ids.
pub type ContactRepository = InMemoryRepository<String, Contact>;

/// Creates an empty person repository that reports modification times.
pub fn person_repository() -> PersonRepository {
    InMemoryRepository::new(|n| n as u32).with_modified(|p: &Person| p.modified)
}

/// Creates an empty contact repository that reports modification times.
pub fn contact_repository() -> ContactRepository {
    InMemoryRepository::new(|n| format!("c{n}")).with_modified(|c: &Contact| c.modified)
}

/// Maps between `Person` and `Contact`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonContactMapper;

impl EntityMapper<Person, Contact> for PersonContactMapper {
    fn map_a_to_b(&self, source: &Person, target: Contact, _context: &SyncContext) -> SyncResult<Contact> {
        Ok(Contact {
            display_name: source.name.clone(),
            age: source.age.to_string(),
            modified: source.modified.or(target.modified),
        })
    }

    fn map_b_to_a(&self, source: &Contact, target: Person, _context: &SyncContext) -> SyncResult<Person> {
        let age = source.age.trim().parse().map_err(|_| {
            SyncError::mapping(format!(
                "contact {:?} has a non-numeric age {:?}",
                source.display_name, source.age
            ))
        })?;
        Ok(Person {
            name: source.display_name.clone(),
            age,
            modified: source.modified.or(target.modified),
        })
    }
}

/// Groups people and contacts by name and compares their ages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PersonContactMatchRules;

impl PropertyMatchRules<Person, Contact> for PersonContactMatchRules {
    type AKey = String;
    type BKey = String;

    fn a_property(&self, entity: &Person) -> String {
        entity.name.clone()
    }

    fn b_property(&self, entity: &Contact) -> String {
        entity.display_name.clone()
    }

    fn map_a_property_to_b(&self, key: &String) -> String {
        key.clone()
    }

    fn are_equal(&self, a: &Person, b: &Contact) -> bool {
        a.age.to_string() == b.age.trim()
    }
}

/// Matcher pairing people and contacts by name and age.
pub fn person_contact_matcher() -> PropertyMatcher<PersonContactMatchRules> {
    PropertyMatcher::new(PersonContactMatchRules)
}
