//! Initial matching benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gensync_bench::utils::names;
use gensync_engine::{InitialEntityMatcher, PropertyMatchRules, PropertyMatcher};

/// Pairs equal strings.
struct ByName;

impl PropertyMatchRules<String, String> for ByName {
    type AKey = String;
    type BKey = String;

    fn a_property(&self, entity: &String) -> String {
        entity.clone()
    }

    fn b_property(&self, entity: &String) -> String {
        entity.clone()
    }

    fn map_a_property_to_b(&self, key: &String) -> String {
        key.clone()
    }

    fn are_equal(&self, a: &String, b: &String) -> bool {
        a == b
    }
}

/// Benchmark matching with few and with many candidates per key.
fn bench_find_matching_entities(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_matching_entities");
    let matcher = PropertyMatcher::new(ByName);

    for size in [100, 1_000, 10_000] {
        for (label, distinct) in [("unique_keys", size), ("crowded_keys", size / 50)] {
            let a: Vec<(u32, String)> = names(size, distinct)
                .into_iter()
                .enumerate()
                .map(|(i, name)| (i as u32, name))
                .collect();
            let b: Vec<(u32, String)> = names(size, distinct)
                .into_iter()
                .enumerate()
                .map(|(i, name)| (i as u32, name))
                .collect();
            let a_refs: Vec<(&u32, &String)> = a.iter().map(|(id, e)| (id, e)).collect();
            let b_refs: Vec<(&u32, &String)> = b.iter().map(|(id, e)| (id, e)).collect();
            group.throughput(Throughput::Elements(size as u64));

            group.bench_with_input(BenchmarkId::new(label, size), &size, |bencher, _| {
                bencher.iter(|| {
                    let relations = matcher.find_matching_entities(black_box(&a_refs), black_box(&b_refs));
                    black_box(relations);
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_find_matching_entities);
criterion_main!(benches);
