//! Heap lookup and replay benchmarks.
//!
//! `find_object` is on the path of every pointer a scan reports, so its cost
//! dominates replay of large traces.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use gclab::batch::{AllocHeapBits, BatchKind, BatchWriter};
use gclab::heap::{default_size_classes, PAGE_BYTES};
use gclab::{Heap, Heaper, Replayer, ScanKind, SizeClass, TraceEvent, VAddr};

const SPANS: u64 = 2_000;

/// Spans of a few small classes, one every eighth page, across two arenas.
fn populated_heap(classes: &Arc<[SizeClass]>) -> Heap {
    let mut heap = Heap::new(Arc::clone(classes));
    for i in 0..SPANS {
        let sc = &classes[[2, 4, 5, 10][(i % 4) as usize]];
        heap.new_span(VAddr(PAGE_BYTES.0 * (i * 8)), sc, i % 7 == 0);
    }
    heap
}

fn bench_find_object(c: &mut Criterion) {
    let classes: Arc<[SizeClass]> = default_size_classes().into();
    let heap = populated_heap(&classes);
    let lookups: Vec<VAddr> = (0..4096u64)
        .map(|i| VAddr(PAGE_BYTES.0 * ((i * 37) % (SPANS * 8)) + (i * 24) % 8160))
        .collect();

    let mut group = c.benchmark_group("find_object");
    group.bench_function("hits_and_misses_4096", |b| {
        b.iter(|| {
            let mut found = 0usize;
            for &p in &lookups {
                if heap.find_object(black_box(p)).is_some() {
                    found += 1;
                }
            }
            black_box(found)
        });
    });
    group.bench_function("objects_walk", |b| {
        b.iter(|| black_box(heap.objects().count()));
    });
    group.finish();
}

/// A cycle over `spans` 32-byte spans where every object points to the next.
fn chain_cycle(spans: u64) -> Vec<TraceEvent> {
    let mut sizes = BatchWriter::new(BatchKind::Sizes, 1);
    sizes.size_classes(&default_size_classes());

    let mut span_batch = BatchWriter::new(BatchKind::Spans, 1);
    let mut allocs = BatchWriter::new(BatchKind::Allocs, 1);
    let mut scans = BatchWriter::new(BatchKind::Scan, 1);
    let objects_per_span = PAGE_BYTES.0 / 32;
    let obj = |i: u64| VAddr(PAGE_BYTES.0 * (16 + i / objects_per_span) + 32 * (i % objects_per_span));
    let total = spans * objects_per_span;

    for s in 0..spans {
        let base = VAddr(PAGE_BYTES.0 * (16 + s));
        span_batch.span(base.0, 4 << 1);
        allocs.alloc(base, objects_per_span, &[u64::MAX; 4], AllocHeapBits::Packed(&[0; 4]));
    }
    scans.scan(VAddr(0x100), ScanKind::Root, &[(0, obj(0), true)]);
    for i in 0..total {
        let next: &[(u64, VAddr, bool)] = if i + 1 < total {
            &[(0, obj(i + 1), true)]
        } else {
            &[]
        };
        scans.scan(obj(i), ScanKind::Object, next);
    }

    vec![
        TraceEvent::Batch(sizes.finish()),
        TraceEvent::Batch(span_batch.finish()),
        TraceEvent::GcStart {
            generation: 1,
            parallelism: 1,
        },
        TraceEvent::Batch(allocs.finish()),
        TraceEvent::Batch(scans.finish()),
        TraceEvent::GcDone { generation: 1 },
    ]
}

fn bench_replay(c: &mut Criterion) {
    let events = chain_cycle(64);
    let mut group = c.benchmark_group("replay");
    group.sample_size(20);
    group.bench_function("chain_64_spans", |b| {
        b.iter_batched(
            || events.clone(),
            |events| {
                let mut replay = Replayer::new(Heaper::new());
                replay.run(events).unwrap();
                black_box(replay.into_inner().cycles_completed())
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_find_object, bench_replay);
criterion_main!(benches);
