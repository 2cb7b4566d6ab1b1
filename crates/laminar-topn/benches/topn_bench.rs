//! Append-only Top-N Criterion benchmarks.
//!
//! Measures per-row cost of both output algorithms on a warm cache and the
//! cost of rebuilding partitions from state when the cache holds only one.
//!
//! Run with: cargo bench --bench topn_bench

use std::hint::black_box;
use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch, StringArray};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use laminar_topn::config::{RankRange, TopNConfig};
use laminar_topn::operator::sort_key::{PartitionColumn, TopNSortColumn};
use laminar_topn::operator::{Event, Operator, OperatorContext};
use laminar_topn::state::InMemoryStore;
use laminar_topn::AppendOnlyTopNOperator;

const PARTITIONS: [&str; 8] = ["p0", "p1", "p2", "p3", "p4", "p5", "p6", "p7"];

fn make_events(count: usize) -> Vec<Event> {
    let mut seed = 0x9e37_79b9_7f4a_7c15_u64;
    (0..count)
        .map(|i| {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let r = seed >> 33;
            let partition = PARTITIONS[(r % 8) as usize];
            let value = ((r >> 3) % 10_000) as i64;
            let batch = RecordBatch::try_from_iter(vec![
                ("category", Arc::new(StringArray::from(vec![partition])) as _),
                ("value", Arc::new(Int64Array::from(vec![value])) as _),
            ])
            .unwrap();
            Event::new(i as i64, batch)
        })
        .collect()
}

fn make_operator(end: u64, ranked: bool, cache_size: u64) -> AppendOnlyTopNOperator {
    let config = TopNConfig::builder("bench_topn")
        .partition_column(PartitionColumn::new("category"))
        .sort_column(TopNSortColumn::descending("value"))
        .rank_range(RankRange::constant(1, end))
        .output_rank_number(ranked)
        .cache_size(cache_size)
        .build()
        .unwrap();
    AppendOnlyTopNOperator::new(config).unwrap()
}

fn bench_algorithms(c: &mut Criterion) {
    let events = make_events(2_000);
    let mut group = c.benchmark_group("topn_process");
    group.throughput(Throughput::Elements(events.len() as u64));

    for end in [3u64, 10, 100] {
        for (name, ranked) in [("with_row_number", true), ("without_row_number", false)] {
            group.bench_with_input(BenchmarkId::new(name, end), &end, |b, &end| {
                b.iter(|| {
                    let mut op = make_operator(end, ranked, 10_000);
                    let mut store = InMemoryStore::new();
                    let mut ctx = OperatorContext::new(0, &mut store);
                    for event in &events {
                        black_box(op.process(event, &mut ctx).unwrap());
                    }
                });
            });
        }
    }
    group.finish();
}

fn bench_cache_miss_replay(c: &mut Criterion) {
    let events = make_events(2_000);
    let mut group = c.benchmark_group("topn_replay");
    group.throughput(Throughput::Elements(events.len() as u64));

    for (name, cache_size) in [("warm", 10_000u64), ("one_partition", 10)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut op = make_operator(10, true, cache_size);
                let mut store = InMemoryStore::new();
                let mut ctx = OperatorContext::new(0, &mut store);
                for event in &events {
                    black_box(op.process(event, &mut ctx).unwrap());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_algorithms, bench_cache_miss_replay);
criterion_main!(benches);
