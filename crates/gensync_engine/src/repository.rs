//! Repository contract for one side of a synchronization.

use crate::error::SyncResult;
use crate::version::EntityVersion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// Time range handed to [`EntityRepository::get_versions`].
///
/// The engine never interprets the range; repositories of time-bound
/// entities (calendar events, tasks) use it to limit their queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryRange {
    /// Inclusive start, unbounded if `None`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive end, unbounded if `None`.
    pub to: Option<DateTime<Utc>>,
}

impl QueryRange {
    /// A range without bounds.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Returns true if neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Returns true if `at` lies within the range.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }
}

/// Requirements on entity ids.
///
/// Equality of ids is the type's `Eq`; wrap ids in a newtype to get a
/// different notion of identity.
pub trait SyncId:
    Clone + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> SyncId for T where
    T: Clone + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Requirements on version tokens.
pub trait SyncVersion:
    Clone + PartialEq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> SyncVersion for T where
    T: Clone + PartialEq + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Fills a blank entity provided by the repository.
pub type EntityInitializer<'a, E> = Box<dyn FnOnce(E) -> SyncResult<E> + Send + 'a>;

/// Rewrites an existing entity.
pub type EntityModifier<'a, E> = Box<dyn FnOnce(E) -> SyncResult<E> + Send + 'a>;

/// Access to one side's entity collection.
///
/// Errors returned from any method are classified by the engine's exception
/// handling strategy; see [`crate::SyncError::is_run_aborting`] for the
/// default classification.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Entity id type.
    type Id: SyncId;
    /// Version token type.
    type Version: SyncVersion;
    /// Entity type.
    type Entity: Send + Sync + 'static;

    /// Returns the current version of every entity in `range`, plus every
    /// entity of `known` that still exists, whether in range or not.
    ///
    /// `known` holds the ids of the related entities. An id missing from the
    /// result is treated as deleted, so a repository that limits its query
    /// to `range` must still report these.
    async fn get_versions(
        &self,
        range: QueryRange,
        known: &[Self::Id],
    ) -> SyncResult<Vec<EntityVersion<Self::Id, Self::Version>>>;

    /// Loads the given entities.
    ///
    /// Ids that no longer exist are omitted from the result.
    async fn get(&self, ids: &[Self::Id]) -> SyncResult<Vec<(Self::Id, Self::Entity)>>;

    /// Creates an entity from a blank one filled by `initializer`.
    async fn create(
        &self,
        initializer: EntityInitializer<'_, Self::Entity>,
    ) -> SyncResult<EntityVersion<Self::Id, Self::Version>>;

    /// Updates an entity if it still has `expected` as its version.
    ///
    /// Returns `None` if the entity no longer exists or was modified
    /// concurrently.
    async fn try_update(
        &self,
        id: &Self::Id,
        expected: &Self::Version,
        current: Self::Entity,
        modifier: EntityModifier<'_, Self::Entity>,
    ) -> SyncResult<Option<EntityVersion<Self::Id, Self::Version>>>;

    /// Deletes an entity if it still has `expected` as its version.
    ///
    /// Returns `false` if the entity was already gone.
    async fn try_delete(&self, id: &Self::Id, expected: &Self::Version) -> SyncResult<bool>;

    /// Last modification time of an entity, used by "newer wins" conflict
    /// resolution.
    fn last_modified(&self, _entity: &Self::Entity) -> Option<DateTime<Utc>> {
        None
    }

    /// Receives every loaded entity once the engine is done with it.
    async fn cleanup(&self, _entities: Vec<Self::Entity>) {}
}
