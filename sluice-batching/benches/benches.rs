use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sluice_batching::{AccumulatorConfig, BatchAccumulator, DelayQueue};

fn random_items(count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(count as u64);
    (0..count).map(|_| rng.random_range(0..1_000_000)).collect()
}

fn bench_accumulator(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulator");
    group.sampling_mode(criterion::SamplingMode::Flat);
    group.measurement_time(Duration::from_secs(10));

    for batch_size in [10, 100, 1000] {
        let items = random_items(10_000);
        group.throughput(criterion::Throughput::Elements(items.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("put_and_drain", batch_size),
            &items,
            |b, items| {
                b.iter_batched(
                    || items.clone(),
                    |items| {
                        let processed = Arc::new(AtomicUsize::new(0));
                        let config = AccumulatorConfig {
                            batch_size,
                            period_ms: 10,
                            ..Default::default()
                        };

                        let counter = Arc::clone(&processed);
                        let accumulator =
                            BatchAccumulator::new("bench", config, move |batch: Vec<u64>, _: bool| {
                                counter.fetch_add(black_box(batch).len(), Ordering::Relaxed);
                            })
                            .unwrap();

                        accumulator.put_all(items);
                        accumulator.stop_and_await();
                        assert_eq!(processed.load(Ordering::Relaxed), 10_000);
                    },
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

fn bench_delay_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay_queue");

    for size in [100, 10_000] {
        let items = random_items(size);
        group.throughput(criterion::Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("push_take", size), &items, |b, items| {
            b.iter(|| {
                let queue = DelayQueue::new();
                let now = std::time::Instant::now();
                for &item in items {
                    let release_at = now.checked_sub(Duration::from_micros(item)).unwrap_or(now);
                    queue.push(item, release_at);
                }
                black_box(queue.take_released(now))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_accumulator, bench_delay_queue);
criterion_main!(benches);
