//! Benchmark utilities.

use gensync_engine::{EntityVersion, InMemoryRepository};
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate a version snapshot of `count` entities with random versions.
pub fn snapshot(count: usize) -> Vec<EntityVersion<u32, u64>> {
    let mut rng = rand::thread_rng();
    (0..count as u32)
        .map(|id| EntityVersion::new(id, rng.gen()))
        .collect()
}

/// Derive a fresh snapshot from `known`: `changed` and `deleted` are
/// fractions of the known entities, `added` the number of new ones.
pub fn evolve(
    known: &[EntityVersion<u32, u64>],
    changed: f64,
    deleted: f64,
    added: usize,
) -> Vec<EntityVersion<u32, u64>> {
    let mut rng = rand::thread_rng();
    let mut fresh = Vec::with_capacity(known.len() + added);
    for v in known {
        if rng.gen_bool(deleted) {
            continue;
        }
        if rng.gen_bool(changed) {
            fresh.push(EntityVersion::new(v.id, v.version.wrapping_add(1)));
        } else {
            fresh.push(v.clone());
        }
    }
    let next = known.iter().map(|v| v.id).max().map_or(0, |id| id + 1);
    fresh.extend((next..next + added as u32).map(|id| EntityVersion::new(id, rng.gen())));
    fresh.shuffle(&mut rng);
    fresh
}

/// Generate `count` names out of `distinct` different ones.
pub fn names(count: usize, distinct: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| format!("name-{}", rng.gen_range(0..distinct.max(1))))
        .collect()
}

/// Create a repository filled with `count` random text entities.
pub fn filled_repository(count: usize, id_offset: u32) -> InMemoryRepository<u32, String> {
    let repo = InMemoryRepository::new(move |n| id_offset + n as u32);
    for name in names(count, count) {
        repo.insert(name);
    }
    repo
}
