//! Criterion micro-benchmarks for the fixed-priority channel's hot paths:
//! single-threaded `try_write`/`try_read` round-trips, and drain-time for a
//! full multiset under a varying number of priority levels.

use criterion::{Criterion, criterion_group, criterion_main};

use pq_channel::FixedPriorityChannel;
use pq_core::PriorityItem;

fn bench_try_write_try_read(c: &mut Criterion) {
    c.bench_function("fixed_channel_write_read_roundtrip", |b| {
        let chan = FixedPriorityChannel::<u64>::new(4);
        let mut i = 0u64;
        b.iter(|| {
            chan.try_write(PriorityItem::new((i % 4) as i64, i));
            chan.try_read().unwrap();
            i += 1;
        });
    });
}

fn bench_drain_multiset(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed_channel_drain");
    for levels in [1usize, 4, 16] {
        group.bench_function(format!("levels={levels}"), |b| {
            b.iter_batched(
                || {
                    let chan = FixedPriorityChannel::<u64>::new(levels);
                    for i in 0..10_000u64 {
                        chan.try_write(PriorityItem::new((i as usize % levels) as i64, i));
                    }
                    chan
                },
                |chan| {
                    while chan.try_read().is_some() {}
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_try_write_try_read, bench_drain_multiset);
criterion_main!(benches);
