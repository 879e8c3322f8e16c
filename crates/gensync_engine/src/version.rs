//! Version tracking and change detection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// The version of one entity as reported by a repository.
///
/// The version is an opaque token (timestamp, ETag, revision). Two snapshots
/// of the same id differ exactly when their versions are not equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityVersion<I, V> {
    /// Entity id.
    pub id: I,
    /// Version token.
    pub version: V,
}

impl<I, V> EntityVersion<I, V> {
    /// Creates a new entity version.
    pub fn new(id: I, version: V) -> Self {
        Self { id, version }
    }
}

/// Decides whether two version tokens denote the same entity state.
pub trait VersionComparer<V>: Send + Sync {
    /// Returns true if both versions are equal.
    fn equals(&self, left: &V, right: &V) -> bool;
}

/// Compares versions with `PartialEq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultVersionComparer;

impl<V: PartialEq> VersionComparer<V> for DefaultVersionComparer {
    fn equals(&self, left: &V, right: &V) -> bool {
        left == right
    }
}

/// Compares string versions ignoring ASCII case, for servers that change the
/// case of ETags between responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaseInsensitiveVersionComparer;

impl VersionComparer<String> for CaseInsensitiveVersionComparer {
    fn equals(&self, left: &String, right: &String) -> bool {
        left.eq_ignore_ascii_case(right)
    }
}

/// Classification of a fresh snapshot against the known one.
///
/// `added`, `deleted`, `changed` and `unchanged` are disjoint and together
/// cover every id of both snapshots. Deleted entries carry the last known
/// version, all others the fresh version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDelta<I, V> {
    /// Ids only present in the fresh snapshot.
    pub added: Vec<EntityVersion<I, V>>,
    /// Ids only present in the known snapshot.
    pub deleted: Vec<EntityVersion<I, V>>,
    /// Ids present in both with differing versions.
    pub changed: Vec<EntityVersion<I, V>>,
    /// Ids present in both with equal versions.
    pub unchanged: Vec<EntityVersion<I, V>>,
}

impl<I, V> VersionDelta<I, V> {
    /// Returns true if nothing was added, deleted or changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.changed.is_empty()
    }
}

impl<I, V> Default for VersionDelta<I, V> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            deleted: Vec::new(),
            changed: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

/// Last known version per id for one side.
///
/// # Example
///
/// ```rust
/// use gensync_engine::{EntityVersion, VersionStorage};
///
/// let mut storage = VersionStorage::new();
/// storage.set_new_versions(vec![EntityVersion::new(1, "v1")]);
///
/// let delta = storage.set_new_versions(vec![EntityVersion::new(1, "v2")]);
/// assert_eq!(delta.changed, vec![EntityVersion::new(1, "v2")]);
/// ```
pub struct VersionStorage<I, V> {
    known: HashMap<I, V>,
    comparer: Arc<dyn VersionComparer<V>>,
}

impl<I, V> VersionStorage<I, V>
where
    I: Eq + Hash + Clone,
    V: Clone + 'static,
{
    /// Creates an empty storage with a custom comparer.
    pub fn with_comparer(comparer: Arc<dyn VersionComparer<V>>) -> Self {
        Self {
            known: HashMap::new(),
            comparer,
        }
    }

    /// Creates a storage that already knows the given versions.
    pub fn with_known(
        known: impl IntoIterator<Item = EntityVersion<I, V>>,
        comparer: Arc<dyn VersionComparer<V>>,
    ) -> Self {
        Self {
            known: known.into_iter().map(|v| (v.id, v.version)).collect(),
            comparer,
        }
    }

    /// Returns the currently known versions.
    pub fn known_versions(&self) -> &HashMap<I, V> {
        &self.known
    }

    /// Returns the known version of one entity.
    pub fn known_version(&self, id: &I) -> Option<&V> {
        self.known.get(id)
    }

    /// Compares `fresh` against the known versions and then replaces the known
    /// versions with `fresh`.
    ///
    /// Added, changed and unchanged entries keep the order of `fresh`. If an
    /// id occurs more than once in `fresh`, the last occurrence wins.
    pub fn set_new_versions(
        &mut self,
        fresh: impl IntoIterator<Item = EntityVersion<I, V>>,
    ) -> VersionDelta<I, V> {
        let mut order = Vec::new();
        let mut fresh_map: HashMap<I, V> = HashMap::new();
        for entry in fresh {
            if fresh_map.insert(entry.id.clone(), entry.version).is_none() {
                order.push(entry.id);
            }
        }

        let mut delta = VersionDelta::default();
        for id in order {
            let Some(version) = fresh_map.get(&id) else {
                continue;
            };
            let entry = EntityVersion::new(id.clone(), version.clone());
            match self.known.get(&id) {
                None => delta.added.push(entry),
                Some(known) if self.comparer.equals(known, version) => {
                    delta.unchanged.push(entry)
                }
                Some(_) => delta.changed.push(entry),
            }
        }

        for (id, version) in &self.known {
            if !fresh_map.contains_key(id) {
                delta
                    .deleted
                    .push(EntityVersion::new(id.clone(), version.clone()));
            }
        }

        self.known = fresh_map;
        delta
    }
}

impl<I, V> VersionStorage<I, V>
where
    I: Eq + Hash + Clone,
    V: Clone + PartialEq + 'static,
{
    /// Creates an empty storage comparing versions with `PartialEq`.
    pub fn new() -> Self {
        Self::with_comparer(Arc::new(DefaultVersionComparer))
    }
}

impl<I, V> Default for VersionStorage<I, V>
where
    I: Eq + Hash + Clone,
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn versions(pairs: &[(u32, &'static str)]) -> Vec<EntityVersion<u32, &'static str>> {
        pairs
            .iter()
            .map(|&(id, version)| EntityVersion::new(id, version))
            .collect()
    }

    fn ids<V>(entries: &[EntityVersion<u32, V>]) -> Vec<u32> {
        let mut ids: Vec<u32> = entries.iter().map(|e| e.id).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn cold_start_reports_everything_added() {
        let mut storage = VersionStorage::new();
        let delta = storage.set_new_versions(versions(&[(1, "v1"), (2, "v1")]));

        assert_eq!(ids(&delta.added), vec![1, 2]);
        assert!(delta.deleted.is_empty());
        assert!(delta.changed.is_empty());
        assert_eq!(storage.known_versions().len(), 2);
    }

    #[test]
    fn delta_classification() {
        let mut storage = VersionStorage::new();
        storage.set_new_versions(versions(&[(1, "v1"), (2, "v1"), (3, "v1"), (4, "v1")]));

        let delta = storage.set_new_versions(versions(&[(2, "v1"), (3, "v2"), (4, "v1"), (5, "v1")]));

        assert_eq!(ids(&delta.added), vec![5]);
        assert_eq!(ids(&delta.deleted), vec![1]);
        assert_eq!(ids(&delta.changed), vec![3]);
        assert_eq!(ids(&delta.unchanged), vec![2, 4]);
        assert_eq!(delta.changed[0].version, "v2");
        assert_eq!(delta.deleted[0].version, "v1");
    }

    #[test]
    fn known_map_is_replaced() {
        let mut storage = VersionStorage::with_known(versions(&[(1, "v1")]), Arc::new(DefaultVersionComparer));
        storage.set_new_versions(versions(&[(2, "v7")]));

        assert_eq!(storage.known_version(&1), None);
        assert_eq!(storage.known_version(&2), Some(&"v7"));

        let delta = storage.set_new_versions(versions(&[(2, "v7")]));
        assert!(delta.is_empty());
    }

    #[test]
    fn custom_comparer_decides_changes() {
        let mut storage: VersionStorage<u32, String> = VersionStorage::with_known(
            vec![EntityVersion::new(1, "\"ABC\"".to_string())],
            Arc::new(CaseInsensitiveVersionComparer),
        );

        let delta = storage.set_new_versions(vec![EntityVersion::new(1, "\"abc\"".to_string())]);
        assert!(delta.changed.is_empty());
        assert_eq!(delta.unchanged.len(), 1);
    }

    #[test]
    fn duplicate_fresh_ids_keep_last_version() {
        let mut storage = VersionStorage::with_known(versions(&[(1, "v1")]), Arc::new(DefaultVersionComparer));
        let delta = storage.set_new_versions(versions(&[(1, "v2"), (1, "v1")]));

        assert!(delta.changed.is_empty());
        assert_eq!(delta.unchanged.len(), 1);
    }

    #[test]
    fn fresh_order_is_preserved() {
        let mut storage = VersionStorage::new();
        let delta = storage.set_new_versions(versions(&[(9, "a"), (3, "a"), (7, "a")]));
        let order: Vec<u32> = delta.added.iter().map(|e| e.id).collect();
        assert_eq!(order, vec![9, 3, 7]);
    }

    proptest! {
        #[test]
        fn delta_partitions_all_ids(
            old in prop::collection::hash_map(0u32..64, 0u8..4, 0..32),
            new in prop::collection::hash_map(0u32..64, 0u8..4, 0..32),
        ) {
            let mut storage = VersionStorage::with_known(
                old.iter().map(|(&id, &v)| EntityVersion::new(id, v)),
                Arc::new(DefaultVersionComparer),
            );
            let delta = storage.set_new_versions(new.iter().map(|(&id, &v)| EntityVersion::new(id, v)));

            let mut seen = HashSet::new();
            for entry in delta.added.iter().chain(&delta.deleted).chain(&delta.changed).chain(&delta.unchanged) {
                prop_assert!(seen.insert(entry.id), "id {} classified twice", entry.id);
            }

            let expected: HashSet<u32> = old.keys().chain(new.keys()).copied().collect();
            prop_assert_eq!(seen, expected);

            for entry in &delta.unchanged {
                prop_assert_eq!(old.get(&entry.id), Some(&entry.version));
            }
            for entry in &delta.changed {
                prop_assert_ne!(old.get(&entry.id), Some(&entry.version));
            }
        }
    }
}
