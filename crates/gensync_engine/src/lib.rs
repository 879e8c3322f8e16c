//! # GenSync Engine
//!
//! Generic bidirectional entity synchronization.
//!
//! This crate provides:
//! - Change detection by diffing version snapshots against the last run
//! - Persisted 1:1 relations between entities of two repositories
//! - Initial matching of entities that already exist on both sides
//! - A state machine deriving one action per relation
//! - Pluggable conflict resolution for two-way synchronization
//! - Chunked execution that isolates per-entity failures
//!
//! ## Architecture
//!
//! The two sides (A and B) are [`EntityRepository`] implementations with
//! their own id, version and entity types. An [`EntityMapper`] converts
//! entities between them. A run proceeds strictly in phases:
//!
//! 1. Query the versions of both sides
//! 2. Diff them against the versions recorded in the relations
//! 3. Match new entities against each other
//! 4. Build one [`EntitySyncState`] per relation and new entity
//! 5. Execute the states in chunks
//! 6. Persist the relations
//!
//! ## Key Invariants
//!
//! - Relations are 1:1; every id takes part in at most one relation
//! - A run with no external changes performs no writes
//! - A failed entity keeps its previous relation and is re-evaluated next run
//! - Completed work is persisted even when the run is aborted
//! - The relations file is only replaced by a fully written new one

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod conflict;
mod error;
mod executor;
mod mapper;
mod matcher;
mod memory;
mod persistence;
mod relation;
mod report;
mod repository;
mod state;
mod synchronizer;
mod types;
mod version;

pub use config::{SyncConfig, SyncMode};
pub use conflict::{
    newer_side, ConflictPolicy, ConflictResolution, ConflictResolutionStrategy, DeletionResolution,
};
pub use error::{SyncError, SyncResult};
pub use executor::{DefaultExceptionHandling, ExceptionHandlingStrategy, RecordOf, StateOf};
pub use mapper::{EntityMapper, IdentityMapper, SyncContext};
pub use matcher::{InitialEntityMatcher, PropertyMatchRules, PropertyMatcher};
pub use memory::{InMemoryRepository, InjectedFailure, Operation};
pub use persistence::{
    decode_relations, encode_relations, RelationStore, RELATIONS_FILE_NAME,
    RELATIONS_FORMAT_VERSION, RELATIONS_MAGIC,
};
pub use relation::{EntityRelationStorage, RelationRecord};
pub use report::{
    CountingProgress, EntityReport, NullProgress, ProgressReporter, Severity, SideCounts,
    SyncReport,
};
pub use repository::{
    EntityInitializer, EntityModifier, EntityRepository, QueryRange, SyncId, SyncVersion,
};
pub use state::{EntitySyncState, KnownRelation, SideStatus, StateFactory, SyncAction};
pub use synchronizer::Synchronizer;
pub use types::{Direction, Side};
pub use version::{
    CaseInsensitiveVersionComparer, DefaultVersionComparer, EntityVersion, VersionComparer,
    VersionDelta, VersionStorage,
};
