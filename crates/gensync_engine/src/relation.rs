//! Relations between A-side and B-side entities.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// One pair of entities believed to represent the same real-world item.
///
/// The versions are the ones both entities had after the last successful
/// synchronization; they are what the next run compares against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord<AI, AV, BI, BV> {
    /// A-side entity id.
    pub a_id: AI,
    /// A-side version at the last synchronization.
    pub a_version: AV,
    /// B-side entity id.
    pub b_id: BI,
    /// B-side version at the last synchronization.
    pub b_version: BV,
}

impl<AI, AV, BI, BV> RelationRecord<AI, AV, BI, BV> {
    /// Creates a new relation record.
    pub fn new(a_id: AI, a_version: AV, b_id: BI, b_version: BV) -> Self {
        Self {
            a_id,
            a_version,
            b_id,
            b_version,
        }
    }
}

/// Bidirectional 1:1 map between A-ids and B-ids.
///
/// # Invariants
///
/// - `b_by_a` and `a_by_b` are exact inverses of each other
/// - Every A-id maps to at most one B-id and vice versa
#[derive(Debug, Clone)]
pub struct EntityRelationStorage<AI, BI> {
    b_by_a: HashMap<AI, BI>,
    a_by_b: HashMap<BI, AI>,
}

impl<AI, BI> EntityRelationStorage<AI, BI>
where
    AI: Eq + Hash + Clone + Debug,
    BI: Eq + Hash + Clone + Debug,
{
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self {
            b_by_a: HashMap::new(),
            a_by_b: HashMap::new(),
        }
    }

    /// Relates `a_id` and `b_id`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateRelation` if either id is already related; the
    /// storage is left unchanged in that case.
    pub fn add_relation(&mut self, a_id: AI, b_id: BI) -> SyncResult<()> {
        if self.b_by_a.contains_key(&a_id) || self.a_by_b.contains_key(&b_id) {
            return Err(SyncError::DuplicateRelation(format!("{a_id:?} <-> {b_id:?}")));
        }
        self.b_by_a.insert(a_id.clone(), b_id.clone());
        self.a_by_b.insert(b_id, a_id);
        Ok(())
    }

    /// Returns the B-id related to `a_id`.
    pub fn try_get_b_by_a(&self, a_id: &AI) -> Option<&BI> {
        self.b_by_a.get(a_id)
    }

    /// Returns the A-id related to `b_id`.
    pub fn try_get_a_by_b(&self, b_id: &BI) -> Option<&AI> {
        self.a_by_b.get(b_id)
    }

    /// Removes the relation of `a_id`, returning the B-id it was related to.
    pub fn try_remove_by_a(&mut self, a_id: &AI) -> Option<BI> {
        let b_id = self.b_by_a.remove(a_id)?;
        self.a_by_b.remove(&b_id);
        Some(b_id)
    }

    /// Removes the relation of `b_id`, returning the A-id it was related to.
    pub fn try_remove_by_b(&mut self, b_id: &BI) -> Option<AI> {
        let a_id = self.a_by_b.remove(b_id)?;
        self.b_by_a.remove(&a_id);
        Some(a_id)
    }

    /// Returns the number of relations.
    pub fn len(&self) -> usize {
        self.b_by_a.len()
    }

    /// Returns true if there are no relations.
    pub fn is_empty(&self) -> bool {
        self.b_by_a.is_empty()
    }

    /// Iterates over all relations in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&AI, &BI)> {
        self.b_by_a.iter()
    }
}

impl<AI, BI> Default for EntityRelationStorage<AI, BI>
where
    AI: Eq + Hash + Clone + Debug,
    BI: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lookup_both_directions() {
        let mut storage = EntityRelationStorage::new();
        storage.add_relation(1u32, "one".to_string()).unwrap();

        assert_eq!(storage.try_get_b_by_a(&1), Some(&"one".to_string()));
        assert_eq!(storage.try_get_a_by_b(&"one".to_string()), Some(&1));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut storage = EntityRelationStorage::new();
        storage.add_relation(1u32, 10u32).unwrap();

        assert!(matches!(
            storage.add_relation(1, 11),
            Err(SyncError::DuplicateRelation(_))
        ));
        assert!(storage.add_relation(2, 10).is_err());
        assert_eq!(storage.try_get_b_by_a(&1), Some(&10));
        assert_eq!(storage.try_get_a_by_b(&11), None);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn remove_by_a_clears_both_directions() {
        let mut storage = EntityRelationStorage::new();
        storage.add_relation(1u32, 10u32).unwrap();

        assert_eq!(storage.try_remove_by_a(&1), Some(10));
        assert_eq!(storage.try_get_b_by_a(&1), None);
        assert_eq!(storage.try_get_a_by_b(&10), None);
        assert!(storage.is_empty());
        assert_eq!(storage.try_remove_by_a(&1), None);
    }

    #[test]
    fn remove_by_b_clears_both_directions() {
        let mut storage = EntityRelationStorage::new();
        storage.add_relation(1u32, 10u32).unwrap();
        storage.add_relation(2, 20).unwrap();

        assert_eq!(storage.try_remove_by_b(&20), Some(2));
        assert_eq!(storage.try_get_b_by_a(&2), None);
        assert_eq!(storage.try_get_b_by_a(&1), Some(&10));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, u8),
        RemoveA(u8),
        RemoveB(u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..16, 0u8..16).prop_map(|(a, b)| Op::Add(a, b)),
            (0u8..16).prop_map(Op::RemoveA),
            (0u8..16).prop_map(Op::RemoveB),
        ]
    }

    proptest! {
        #[test]
        fn maps_stay_inverse(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut storage = EntityRelationStorage::new();
            for op in ops {
                match op {
                    Op::Add(a, b) => { let _ = storage.add_relation(a, b); }
                    Op::RemoveA(a) => { storage.try_remove_by_a(&a); }
                    Op::RemoveB(b) => { storage.try_remove_by_b(&b); }
                }
            }

            prop_assert_eq!(storage.b_by_a.len(), storage.a_by_b.len());
            for (a, b) in storage.iter() {
                prop_assert_eq!(storage.try_get_a_by_b(b), Some(a));
            }
        }
    }
}
