//! Performance benchmarks for matching-key computation and the
//! intra-cycle grouping pass.
//!
//! Run with: `cargo bench --bench grouping`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;
use std::sync::Arc;

use asset_identity_kernel::store::InMemoryRecordStore;
use asset_identity_kernel::{
    normalize_address, AccessLevelInstance, AddressNormalizer, CanonicalRecord, CycleId,
    MatchMergeEngine, MatchingCriteria, MatchingKey, OrgId, RecordType, RunMode, StateRecord,
    View,
};
use chrono::Utc;
use tokio::runtime::Runtime;

fn make_state(org: OrgId, i: usize) -> StateRecord {
    let mut state = StateRecord::new(org, RecordType::Property, Utc::now());
    // Half the records collide pairwise on pm_property_id.
    state.pm_property_id = Some(format!("PM-{}", i / 2));
    state.address_line_1 = Some(format!("{} Main Street Suite {}", 100 + i, i % 40));
    state
}

/// Benchmark matching-key computation over a batch of States.
fn bench_matching_keys(c: &mut Criterion) {
    let org = OrgId::generate();
    let criteria = MatchingCriteria::resolve(org, RecordType::Property, None).unwrap();

    let mut group = c.benchmark_group("matching_keys");
    for count in [100, 1_000, 10_000] {
        let states: Vec<StateRecord> = (0..count).map(|i| make_state(org, i)).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &states, |b, states| {
            b.iter(|| {
                let normalizer = AddressNormalizer::default();
                let mut groups: BTreeMap<Vec<u8>, usize> = BTreeMap::new();
                for state in states {
                    let key = MatchingKey::for_state(&criteria, state, &normalizer);
                    if !key.is_empty() {
                        *groups.entry(key.canonical_bytes()).or_default() += 1;
                    }
                }
                black_box(groups.len())
            })
        });
    }
    group.finish();
}

/// Benchmark address normalization, memoized and not.
fn bench_address_normalization(c: &mut Criterion) {
    let addresses: Vec<String> = (0..1_000)
        .map(|i| format!("{} North ELM Street, Suite {}", i, i % 25))
        .collect();

    let mut group = c.benchmark_group("address_normalization");
    group.throughput(Throughput::Elements(addresses.len() as u64));
    group.bench_function("uncached", |b| {
        b.iter(|| {
            for raw in &addresses {
                black_box(normalize_address(raw));
            }
        })
    });
    group.bench_function("memoized_repeats", |b| {
        let normalizer = AddressNormalizer::default();
        b.iter(|| {
            for raw in &addresses {
                black_box(normalizer.normalize(raw));
            }
        })
    });
    group.finish();
}

/// Benchmark a preview merge run over one seeded cycle.
fn bench_preview_run(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();

    let mut group = c.benchmark_group("preview_run");
    group.sample_size(20);
    for count in [100, 1_000] {
        let store = Arc::new(InMemoryRecordStore::new());
        let org = OrgId::generate();
        let ali = AccessLevelInstance::new(org, vec!["root".to_string()]);
        let ali_id = ali.id;
        store.add_ali(ali);
        let cycle = CycleId::generate();
        for i in 0..count {
            let state = make_state(org, i);
            let canonical = CanonicalRecord::new(org, RecordType::Property, ali_id, state.updated);
            store.add_view(View::new(cycle, canonical.id, state.id));
            store.add_state(state);
            store.add_canonical(canonical);
        }
        let engine = MatchMergeEngine::new(Arc::clone(&store));

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &engine, |b, engine| {
            b.iter(|| {
                runtime.block_on(async {
                    let report = engine
                        .run_for_org(org, RecordType::Property, RunMode::Preview, None)
                        .await
                        .unwrap();
                    black_box(report.merge_count)
                })
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_matching_keys,
    bench_address_normalization,
    bench_preview_run
);
criterion_main!(benches);
