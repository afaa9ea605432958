//! Fusion throughput for typical hybrid result sizes.
//!
//! Each sub-request returns at most `limit` hits, so realistic inputs are two
//! lists of 5 to 100 entries with partial overlap.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tracklist_core::fusion::{Fusion, FusionParams, FusionStrategy, RankedHit};

/// Two ranked lists of `n` hits sharing roughly half their ids.
fn generate_lists(n: usize) -> (Vec<RankedHit>, Vec<RankedHit>) {
    let lexical = (0..n)
        .map(|i| RankedHit::new(i as i64, 20.0 - i as f64 * 0.1))
        .collect();
    let dense = (0..n)
        .map(|i| RankedHit::new((i + n / 2) as i64, 0.95 - i as f64 * 0.001))
        .collect();
    (lexical, dense)
}

fn bench_fusion(c: &mut Criterion) {
    let params = FusionParams::default();
    let mut group = c.benchmark_group("fusion");
    group.measurement_time(Duration::from_secs(5));

    for &n in &[5usize, 20, 100] {
        let (lexical, dense) = generate_lists(n);
        let lists: [&[RankedHit]; 2] = [&lexical, &dense];
        for name in ["weighted", "rrf"] {
            let strategy = FusionStrategy::from_name(name, &params).unwrap();
            group.bench_with_input(BenchmarkId::new(name, n), &n, |b, &n| {
                b.iter(|| {
                    strategy.fuse(black_box(&lists), n).unwrap()
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_fusion);
criterion_main!(benches);
