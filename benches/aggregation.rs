//! Benchmarks the four `Aggregator` implementations over a federation
//! of 50 updates with 128-dimensional parameter vectors, the rough
//! scale a single aggregation round deals with in practice.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nebula_core::aggregation::aggregator::{Aggregator, WeightedUpdate};
use nebula_core::aggregation::fedavg::FedAvg;
use nebula_core::aggregation::krum::Krum;
use nebula_core::aggregation::median::Median;
use nebula_core::aggregation::trimmed_mean::TrimmedMean;
use nebula_core::parameter_store::DenseParameters;

const FEDERATION_SIZE: usize = 50;
const PARAMETER_LEN: usize = 128;

fn synthetic_updates() -> Vec<WeightedUpdate> {
    (0..FEDERATION_SIZE)
        .map(|i| {
            let seed = i as f64;
            let parameters = DenseParameters::new((0..PARAMETER_LEN).map(|d| seed + d as f64 * 0.01).collect());
            WeightedUpdate {
                source: format!("10.0.{}.{}:5000", i / 255, i % 255).parse().unwrap(),
                parameters,
                weight: 1.0,
            }
        })
        .collect()
}

fn bench_fedavg(c: &mut Criterion) {
    let updates = synthetic_updates();
    c.bench_function("fedavg_50x128", |b| {
        b.iter(|| black_box(FedAvg.aggregate(black_box(&updates)).unwrap()));
    });
}

fn bench_median(c: &mut Criterion) {
    let updates = synthetic_updates();
    c.bench_function("median_50x128", |b| {
        b.iter(|| black_box(Median.aggregate(black_box(&updates)).unwrap()));
    });
}

fn bench_trimmed_mean(c: &mut Criterion) {
    let updates = synthetic_updates();
    let aggregator = TrimmedMean::new(0.1);
    c.bench_function("trimmed_mean_50x128", |b| {
        b.iter(|| black_box(aggregator.aggregate(black_box(&updates)).unwrap()));
    });
}

fn bench_krum(c: &mut Criterion) {
    let updates = synthetic_updates();
    let aggregator = Krum::new(5);
    c.bench_function("krum_50x128", |b| {
        b.iter(|| black_box(aggregator.aggregate(black_box(&updates)).unwrap()));
    });
}

criterion_group!(benches, bench_fedavg, bench_median, bench_trimmed_mean, bench_krum);
criterion_main!(benches);
