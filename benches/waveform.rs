//! Criterion benchmarks for waveform generation and reply parsing.
//!
//! Both run once per sweep point or once per sweep, so they bound how fine a
//! step the procedure can use without the host becoming the bottleneck.
//!
//! Run with: cargo bench --bench waveform

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use iv_sweep::hardware::reply::{parse_scientific, parse_values};
use iv_sweep::procedures::CurrentWaveform;

/// Triangle generation for increasingly fine steps.
fn waveform_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("waveform_triangle");

    let max = 1e-3;
    for steps in [10usize, 1_000, 100_000] {
        let step = max / steps as f64;
        group.throughput(Throughput::Elements((4 * steps + 1) as u64));
        group.bench_with_input(BenchmarkId::new("quarter_steps", steps), &step, |b, &step| {
            b.iter(|| CurrentWaveform::triangle(black_box(max), black_box(step)).unwrap());
        });
    }

    group.finish();
}

/// Parsing of single readings and trace-buffer dumps.
fn reply_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_parsing");

    group.bench_function("scientific", |b| {
        b.iter(|| parse_scientific(black_box("+1.234567E-03")).unwrap());
    });

    let dump = vec!["-4.567890E-07"; 1024].join(",");
    group.throughput(Throughput::Elements(1024));
    group.bench_function("trace_dump_1024", |b| {
        b.iter(|| parse_values(black_box(&dump)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, waveform_generation, reply_parsing);
criterion_main!(benches);
