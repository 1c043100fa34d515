//! Accumulator hot-path benchmark
//!
//! `update`/`update_range` run once per traced access on the guest thread,
//! so their cost bounds the profiler's overhead. The common case is an
//! already-known context.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench accumulator_update
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use unigrams::plugin::{MemoryAccess, MemoryAccessPlugin};
use unigrams::replay::ReplayHost;
use unigrams::report::ReportFormat;
use unigrams::{write_report, Accumulator, ExecutionContext, ProfilerConfig, StackKind, UnigramPlugin};

fn bench_context(i: u64) -> ExecutionContext {
    ExecutionContext::new(StackKind::Asid, 0x400000, 0x401000 + i, (1, 0))
}

/// Benchmark: single-byte update on an existing context
fn bench_update_existing_context(c: &mut Criterion) {
    let mut acc = Accumulator::new();
    let ctx = bench_context(0);
    acc.update(ctx, 0);

    let mut value = 0u8;
    c.bench_function("accumulator_update_existing", |b| {
        b.iter(|| {
            acc.update(black_box(ctx), black_box(value));
            value = value.wrapping_add(1);
        });
    });
}

/// Benchmark: update_range for typical access widths
fn bench_update_range_widths(c: &mut Criterion) {
    let mut group = c.benchmark_group("accumulator_update_range");

    for width in [1usize, 2, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            let mut acc = Accumulator::new();
            let ctx = bench_context(0);
            let buffer: Vec<u8> = (0..width as u8).collect();
            b.iter(|| acc.update_range(black_box(ctx), black_box(&buffer)));
        });
    }

    group.finish();
}

/// Benchmark: full plugin dispatch including the per-accumulator lock
fn bench_plugin_dispatch(c: &mut Criterion) {
    let mut plugin = UnigramPlugin::new(ProfilerConfig::default());
    let mut host = ReplayHost::default();
    plugin
        .initialize(&mut host)
        .expect("replay host provides every dependency");

    let mut i = 0u64;
    let bytes = [0x41u8, 0x42, 0x43, 0x44];
    c.bench_function("plugin_on_memory_access", |b| {
        b.iter(|| {
            let ctx = bench_context(i % 64);
            plugin.on_memory_access(MemoryAccess::new(ctx, 0x9000, &bytes, i % 2 == 0));
            i += 1;
        });
    });
}

/// Benchmark: serializing 1,000 contexts to memory
fn bench_serialize(c: &mut Criterion) {
    let mut acc = Accumulator::new();
    for i in 0..1000 {
        acc.update_range(bench_context(i), &(i as u32).to_le_bytes());
    }
    let format = ReportFormat::default();

    c.bench_function("write_report_1000_contexts", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(1 << 20);
            write_report(black_box(&acc), &mut out, &format).unwrap();
            black_box(out);
        });
    });
}

criterion_group!(
    benches,
    bench_update_existing_context,
    bench_update_range_widths,
    bench_plugin_dispatch,
    bench_serialize,
);
criterion_main!(benches);
