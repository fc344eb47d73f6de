//! Manifold benchmarks using Criterion.
//!
//! Compares engine top-K resolution against a brute-force full sort, and
//! folded against unfolded ingestion, at several manifold sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use grainvdb_cuda::cpu::kernels::magnitude;
use grainvdb_cuda::CpuBackend;
use grainvdb_engine::{Context, ContextOptions, PhaseFold};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const RANK: usize = 128;
const TOP: usize = 10;

fn random_rows(rows: usize, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..rows * RANK).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn phase_context() -> Context {
    let options = ContextOptions {
        fold: Arc::new(PhaseFold),
        ..ContextOptions::default()
    };
    Context::with_options(RANK, Arc::new(CpuBackend::new()), options).expect("valid rank")
}

/// Full-sort baseline over host data.
fn full_sort_top_k(rows: &[f32], probe: &[f32], k: usize) -> Vec<u64> {
    let mut scored: Vec<(u64, f32)> = rows
        .chunks_exact(RANK)
        .enumerate()
        .map(|(id, row)| (id as u64, magnitude(row, probe)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(k).map(|(id, _)| id).collect()
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_top_k");
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(30);

    for rows in [1_000usize, 10_000, 100_000] {
        let data = random_rows(rows, 42);
        let probe = random_rows(1, 7);
        let ctx = phase_context();
        ctx.ingest(&data, rows, false).expect("ingest");

        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("engine", rows), &ctx, |b, ctx| {
            b.iter(|| black_box(ctx.query(black_box(&probe), TOP)))
        });
        group.bench_with_input(BenchmarkId::new("full_sort", rows), &data, |b, data| {
            b.iter(|| black_box(full_sort_top_k(data, black_box(&probe), TOP)))
        });
    }

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.sample_size(20);

    for rows in [1_000usize, 10_000] {
        let data = random_rows(rows, 11);
        group.throughput(Throughput::Elements(rows as u64));

        for folded in [false, true] {
            let label = if folded { "phase_fold" } else { "raw" };
            group.bench_with_input(BenchmarkId::new(label, rows), &data, |b, data| {
                b.iter(|| {
                    let ctx = phase_context();
                    black_box(ctx.ingest(data, rows, folded)).expect("ingest");
                    ctx
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_query, bench_ingest);
criterion_main!(benches);
