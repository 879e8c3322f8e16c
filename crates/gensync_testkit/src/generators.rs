//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use crate::entities::{Contact, Person};
use crate::fixtures::PersonContactRecord;
use gensync_engine::EntityVersion;
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,11}").expect("Invalid regex")
}

/// Strategy for generating people without modification time.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (name_strategy(), 0u32..120).prop_map(|(name, age)| Person::new(name, age))
}

/// Strategy for generating contacts whose age may or may not be numeric.
pub fn contact_strategy() -> impl Strategy<Value = Contact> {
    let age = prop_oneof![
        4 => (0u32..120).prop_map(|age| age.to_string()),
        1 => prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex"),
    ];
    (name_strategy(), age).prop_map(|(name, age)| Contact::new(name, age))
}

/// Strategy for generating a version snapshot with unique ids.
pub fn version_snapshot_strategy(max_len: usize) -> impl Strategy<Value = Vec<EntityVersion<u32, u64>>> {
    prop::collection::btree_map(0u32..1000, any::<u64>(), 0..=max_len).prop_map(|map| {
        map.into_iter()
            .map(|(id, version)| EntityVersion::new(id, version))
            .collect()
    })
}

/// Strategy for generating a known snapshot and a fresh snapshot that
/// shares part of its ids with it.
///
/// Shared ids keep their version with probability one half.
pub fn snapshot_pair_strategy(
    max_len: usize,
) -> impl Strategy<Value = (Vec<EntityVersion<u32, u64>>, Vec<EntityVersion<u32, u64>>)> {
    prop::collection::btree_map(
        0u32..1000,
        (any::<u64>(), any::<bool>(), any::<bool>(), any::<bool>()),
        0..=max_len,
    )
    .prop_map(|entries| {
        let mut known = Vec::new();
        let mut fresh = Vec::new();
        for (id, (version, in_known, in_fresh, changed)) in entries {
            if in_known {
                known.push(EntityVersion::new(id, version));
            }
            if in_fresh {
                let version = if in_known && changed {
                    version.wrapping_add(1)
                } else {
                    version
                };
                fresh.push(EntityVersion::new(id, version));
            }
        }
        (known, fresh)
    })
}

/// Strategy for generating relation records with unique ids on both sides.
pub fn relation_records_strategy(max_len: usize) -> impl Strategy<Value = Vec<PersonContactRecord>> {
    prop::collection::btree_map(0u32..1000, (any::<u64>(), any::<u64>()), 0..=max_len).prop_map(
        |map: BTreeMap<u32, (u64, u64)>| {
            map.into_iter()
                .map(|(a_id, (a_version, b_version))| {
                    PersonContactRecord::new(a_id, a_version, format!("c{a_id}"), b_version)
                })
                .collect()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn snapshot_ids_are_unique(snapshot in version_snapshot_strategy(50)) {
            let ids: HashSet<_> = snapshot.iter().map(|v| v.id).collect();
            prop_assert_eq!(ids.len(), snapshot.len());
        }

        #[test]
        fn relation_records_are_one_to_one(records in relation_records_strategy(50)) {
            let a: HashSet<_> = records.iter().map(|r| r.a_id).collect();
            let b: HashSet<_> = records.iter().map(|r| r.b_id.clone()).collect();
            prop_assert_eq!(a.len(), records.len());
            prop_assert_eq!(b.len(), records.len());
        }

        #[test]
        fn generated_people_have_names(person in person_strategy()) {
            prop_assert!(!person.name.is_empty());
            prop_assert!(person.modified.is_none());
        }
    }
}
