/// Flush watermark and payload generation micro-benchmarks
///
/// The watermark is advanced by every worker after each flush, so contention
/// on it sits directly on the measured write/flush path.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use syscallmeter::payload::random_payload;
use syscallmeter::watermark::FlushWatermark;

const ADVANCES_PER_THREAD: u64 = 10_000;

fn bench_watermark_uncontended(c: &mut Criterion) {
    c.bench_function("watermark_advance_single", |b| {
        let mark = FlushWatermark::new(0);
        let mut next = 0u64;
        b.iter(|| {
            next += 1;
            black_box(mark.advance(black_box(next)));
        });
    });
}

fn bench_watermark_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("watermark_contended");
    for threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * ADVANCES_PER_THREAD));
        group.bench_with_input(
            BenchmarkId::from_parameter(threads),
            &threads,
            |b, &threads| {
                b.iter(|| {
                    let mark = Arc::new(FlushWatermark::new(0));
                    let handles: Vec<_> = (0..threads as u64)
                        .map(|t| {
                            let mark = Arc::clone(&mark);
                            thread::spawn(move || {
                                for i in 0..ADVANCES_PER_THREAD {
                                    mark.advance(i * threads as u64 + t);
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    black_box(mark.get())
                });
            },
        );
    }
    group.finish();
}

fn bench_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload");
    for len in [4096usize, 32 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter(|| black_box(random_payload(len, black_box(7))));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_watermark_uncontended,
    bench_watermark_contended,
    bench_payload
);
criterion_main!(benches);
