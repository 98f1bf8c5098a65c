//! HOT PATH PERFORMANCE BENCHMARKS
//!
//! Per-record operations every decoder runs: pool acquire/release, id
//! generation, throttle admission and resource enrichment.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ingester_lib::core::{FlowLogId, MessageType};
use ingester_lib::platform::{AgentView, PlatformDataManager, PlatformSnapshot, ResourceInfo};
use ingester_lib::record::{
    gen_id, FillContext, FlowLogInput, FlowLogRecord, Pooled, Record, RecordPool, UniversalTag,
};
use ingester_lib::throttler::ThrottlingQueue;
use ingester_lib::writer::Writer;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Discard;

impl Writer<FlowLogRecord> for Discard {
    fn write(&self, _id: FlowLogId, row: Pooled<FlowLogRecord>) -> bool {
        black_box(row);
        true
    }
}

/// Benchmark pool acquire/release
/// TARGET: no allocation once the pool is warm
fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_pool");

    let pool = RecordPool::<FlowLogRecord>::new(1024);
    pool.warm_up(1024);

    group.bench_function("acquire_release", |b| {
        b.iter(|| {
            let mut record = pool.acquire();
            record.flow_id = black_box(42);
            record.tags.push("env", "prod");
            drop(record);
        });
    });

    for count in [16, 256] {
        group.bench_with_input(BenchmarkId::new("decode_batch", count), &count, |b, &count| {
            let ctx = FillContext::new(MessageType::ProtocolLog, 3, chrono::Utc::now());
            let mut out = Vec::with_capacity(count);
            b.iter(|| {
                for i in 0..count {
                    let input = FlowLogInput {
                        flow_id: i as u64,
                        end_time_us: 1_700_000_000_000_000,
                        ..Default::default()
                    };
                    FlowLogRecord::decode_into(input, &ctx, &pool, &mut out);
                }
                out.clear();
            });
        });
    }

    group.finish();
}

/// Benchmark id generation
/// TARGET: one atomic add per id
fn bench_gen_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("gen_id");
    let counter = AtomicU32::new(0);

    group.bench_function("single", |b| {
        b.iter(|| black_box(gen_id(black_box(1_700_000_000), &counter, black_box(17))));
    });

    group.finish();
}

/// Benchmark throttle admission, both under and over the limit
fn bench_throttle(c: &mut Criterion) {
    let mut group = c.benchmark_group("throttle");
    let pool = RecordPool::<FlowLogRecord>::new(64);
    pool.warm_up(64);

    group.bench_function("admit_under_limit", |b| {
        let writer: Arc<dyn Writer<FlowLogRecord>> = Arc::new(Discard);
        let mut queue =
            ThrottlingQueue::new("bench", usize::MAX, 1, Duration::from_secs(1), writer).unwrap();
        b.iter(|| queue.send(FlowLogId::L4Flow, pool.acquire()));
    });

    group.bench_function("drop_over_limit", |b| {
        let writer: Arc<dyn Writer<FlowLogRecord>> = Arc::new(Discard);
        let mut queue =
            ThrottlingQueue::new("bench", 1, 1, Duration::from_secs(3600), writer).unwrap();
        let now = Instant::now();
        b.iter(|| queue.send_at(FlowLogId::L4Flow, pool.acquire(), now));
    });

    group.finish();
}

/// Benchmark resource enrichment against a snapshot
fn bench_enrichment(c: &mut Criterion) {
    let mut group = c.benchmark_group("enrichment");

    let mut builder = PlatformSnapshot::builder(1).agent(
        3,
        AgentView {
            epc_id: 10,
            ..Default::default()
        },
    );
    for i in 0..10_000u32 {
        builder = builder.resource(
            10,
            IpAddr::V4(Ipv4Addr::from(0x0a00_0000 + i)),
            ResourceInfo {
                pod_id: i,
                pod_group_id: i % 100,
                ..Default::default()
            },
        );
    }
    let manager = PlatformDataManager::new(builder.build());
    let table = manager.new_table("bench").unwrap();
    table.start();

    let hit = IpAddr::V4(Ipv4Addr::from(0x0a00_0010));
    let miss = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1));

    group.bench_function("hit", |b| {
        b.iter(|| {
            let mut tag = UniversalTag::default();
            tag.fill_resource(3, black_box(hit), 6, 80, &*table);
            black_box(tag)
        });
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            let mut tag = UniversalTag::default();
            tag.fill_resource(3, black_box(miss), 6, 80, &*table);
            black_box(tag)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool, bench_gen_id, bench_throttle, bench_enrichment);
criterion_main!(benches);
