//! Shared-heap reservation benchmarks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memlayer::SharedHeap;
use std::sync::Arc;

// Address-only region; reservations never touch memory
const BASE: usize = 0x1000;
const SIZE: usize = usize::MAX / 2;

fn bench_reserve(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve");

    for align in [8usize, 64, 4096] {
        let heap = SharedHeap::new(BASE, SIZE).unwrap();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(align), &heap, |b, heap| {
            b.iter(|| std::hint::black_box(heap.reserve(96, align)));
        });
    }

    group.finish();
}

fn bench_reserve_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_contended");

    for threads in [2usize, 4, 8] {
        let heap = Arc::new(SharedHeap::new(BASE, SIZE).unwrap());

        group.throughput(Throughput::Elements((threads * 1000) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let heap = Arc::clone(&heap);
                        std::thread::spawn(move || {
                            for _ in 0..1000 {
                                std::hint::black_box(heap.reserve(64 * 1024, 64 * 1024).ok());
                            }
                        })
                    })
                    .collect();

                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_reserve, bench_reserve_contended);
criterion_main!(benches);
