//! Initial matching of entities that have no relation yet.

use crate::relation::EntityRelationStorage;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::warn;

/// Pairs previously unrelated A-side and B-side entities.
pub trait InitialEntityMatcher<AI, AE, BI, BE>: Send + Sync {
    /// Returns the relations found among the given entities.
    ///
    /// Every id appears in at most one relation.
    fn find_matching_entities(
        &self,
        a_entities: &[(&AI, &AE)],
        b_entities: &[(&BI, &BE)],
    ) -> EntityRelationStorage<AI, BI>;
}

/// Rules for [`PropertyMatcher`].
///
/// Entities are grouped by a property; only entities whose group keys
/// correspond are compared with [`PropertyMatchRules::are_equal`].
pub trait PropertyMatchRules<AE, BE>: Send + Sync {
    /// Group key of A-side entities.
    type AKey: Eq + Hash;
    /// Group key of B-side entities.
    type BKey: Eq + Hash;

    /// Returns the group key of an A-side entity.
    fn a_property(&self, entity: &AE) -> Self::AKey;

    /// Returns the group key of a B-side entity.
    fn b_property(&self, entity: &BE) -> Self::BKey;

    /// Translates an A-side key into the B-side key space.
    fn map_a_property_to_b(&self, key: &Self::AKey) -> Self::BKey;

    /// Returns true if both entities represent the same item.
    fn are_equal(&self, a: &AE, b: &BE) -> bool;
}

/// Greedy property-grouping matcher.
///
/// A-groups are visited in order of first appearance and the entities of a
/// group in the order they were supplied. Each A-entity is paired with the
/// first still unmatched B-candidate (in supplied order) that
/// [`PropertyMatchRules::are_equal`] accepts. The result therefore depends
/// on the input order when several candidates are equal.
#[derive(Debug, Clone)]
pub struct PropertyMatcher<R> {
    rules: R,
}

impl<R> PropertyMatcher<R> {
    /// Creates a matcher with the given rules.
    pub fn new(rules: R) -> Self {
        Self { rules }
    }

    /// Returns the rules.
    pub fn rules(&self) -> &R {
        &self.rules
    }
}

impl<AI, AE, BI, BE, R> InitialEntityMatcher<AI, AE, BI, BE> for PropertyMatcher<R>
where
    AI: Eq + Hash + Clone + Debug,
    BI: Eq + Hash + Clone + Debug,
    R: PropertyMatchRules<AE, BE>,
{
    fn find_matching_entities(
        &self,
        a_entities: &[(&AI, &AE)],
        b_entities: &[(&BI, &BE)],
    ) -> EntityRelationStorage<AI, BI> {
        let mut relations = EntityRelationStorage::new();

        // (mapped key, indices into a_entities), in order of first appearance
        let mut a_groups: Vec<(R::BKey, Vec<usize>)> = Vec::new();
        let mut a_group_index: HashMap<R::AKey, usize> = HashMap::new();
        for (index, (_, entity)) in a_entities.iter().enumerate() {
            let key = self.rules.a_property(entity);
            match a_group_index.get(&key) {
                Some(&group) => a_groups[group].1.push(index),
                None => {
                    let mapped = self.rules.map_a_property_to_b(&key);
                    a_group_index.insert(key, a_groups.len());
                    a_groups.push((mapped, vec![index]));
                }
            }
        }

        let mut b_groups: HashMap<R::BKey, Vec<usize>> = HashMap::new();
        for (index, (_, entity)) in b_entities.iter().enumerate() {
            b_groups
                .entry(self.rules.b_property(entity))
                .or_default()
                .push(index);
        }

        for (mapped_key, members) in a_groups {
            let Some(candidates) = b_groups.get_mut(&mapped_key) else {
                continue;
            };
            for a_index in members {
                let (a_id, a_entity) = a_entities[a_index];
                let found = candidates
                    .iter()
                    .position(|&b_index| self.rules.are_equal(a_entity, b_entities[b_index].1));
                if let Some(position) = found {
                    let b_index = candidates.remove(position);
                    let b_id = b_entities[b_index].0;
                    if relations.add_relation(a_id.clone(), b_id.clone()).is_err() {
                        warn!(a_id = ?a_id, b_id = ?b_id, "duplicate id among match candidates");
                    }
                }
            }
        }

        relations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person {
        name: &'static str,
        age: u32,
    }

    struct Contact {
        name: &'static str,
        age: &'static str,
    }

    struct ByName;

    impl PropertyMatchRules<Person, Contact> for ByName {
        type AKey = &'static str;
        type BKey = &'static str;

        fn a_property(&self, entity: &Person) -> &'static str {
            entity.name
        }

        fn b_property(&self, entity: &Contact) -> &'static str {
            entity.name
        }

        fn map_a_property_to_b(&self, key: &&'static str) -> &'static str {
            *key
        }

        fn are_equal(&self, a: &Person, b: &Contact) -> bool {
            a.age.to_string() == b.age
        }
    }

    fn run(
        a: &[(u32, Person)],
        b: &[(&'static str, Contact)],
    ) -> EntityRelationStorage<u32, &'static str> {
        let a_refs: Vec<_> = a.iter().map(|(id, e)| (id, e)).collect();
        let b_refs: Vec<_> = b.iter().map(|(id, e)| (id, e)).collect();
        PropertyMatcher::new(ByName).find_matching_entities(&a_refs, &b_refs)
    }

    #[test]
    fn only_equal_entities_in_matching_groups_are_related() {
        let a = vec![
            (1, Person { name: "Homer", age: 49 }),
            (2, Person { name: "Marge", age: 49 }),
            (3, Person { name: "Bart", age: 8 }),
        ];
        let b = vec![
            ("one", Contact { name: "Homerx", age: "49" }),
            ("two", Contact { name: "Marge", age: "49" }),
            ("three", Contact { name: "Bart", age: "9" }),
        ];

        let relations = run(&a, &b);

        assert_eq!(relations.len(), 1);
        assert_eq!(relations.try_get_b_by_a(&2), Some(&"two"));
    }

    #[test]
    fn first_candidate_wins() {
        let a = vec![
            (1, Person { name: "Lisa", age: 8 }),
            (2, Person { name: "Lisa", age: 8 }),
        ];
        let b = vec![
            ("x", Contact { name: "Lisa", age: "8" }),
            ("y", Contact { name: "Lisa", age: "8" }),
            ("z", Contact { name: "Lisa", age: "8" }),
        ];

        let relations = run(&a, &b);

        assert_eq!(relations.try_get_b_by_a(&1), Some(&"x"));
        assert_eq!(relations.try_get_b_by_a(&2), Some(&"y"));
        assert_eq!(relations.try_get_a_by_b(&"z"), None);
    }

    #[test]
    fn matched_candidates_are_not_reused() {
        let a = vec![
            (1, Person { name: "Maggie", age: 1 }),
            (2, Person { name: "Maggie", age: 1 }),
        ];
        let b = vec![("m", Contact { name: "Maggie", age: "1" })];

        let relations = run(&a, &b);

        assert_eq!(relations.len(), 1);
        assert_eq!(relations.try_get_b_by_a(&1), Some(&"m"));
    }

    #[test]
    fn empty_inputs() {
        assert!(run(&[], &[]).is_empty());
        let a = vec![(1, Person { name: "Ned", age: 60 })];
        assert!(run(&a, &[]).is_empty());
    }
}
