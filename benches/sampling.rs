//! Sampling and fold assignment benchmarks
//!
//! Run with: cargo bench --bench sampling

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dga_nn::dataset::StratifiedKFold;
use dga_nn::metrics::roc_auc;
use dga_nn::sampler::Sampler;

const CLASSES: usize = 40;
const POSITIONS: usize = 64;

/// Batch of `items` sequences of slightly skewed distributions.
#[allow(clippy::cast_precision_loss)]
fn batch(items: usize) -> Vec<Vec<Vec<f64>>> {
    let raw: Vec<f64> = (0..CLASSES).map(|c| 1.0 + (c % 7) as f64).collect();
    let total: f64 = raw.iter().sum();
    let probs: Vec<f64> = raw.iter().map(|w| w / total).collect();
    vec![vec![probs; POSITIONS]; items]
}

fn bench_sample(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler");

    for items in [1, 32, 256] {
        let data = batch(items);
        for temperature in [0.5, 1.0] {
            group.bench_with_input(
                BenchmarkId::new(format!("t={temperature}"), items),
                &data,
                |b, data| {
                    let mut sampler = Sampler::new(42).with_temperature(temperature).unwrap();
                    b.iter(|| sampler.sample(black_box(data)).unwrap());
                },
            );
        }
    }

    group.finish();
}

fn bench_fold_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("stratified_kfold");

    for rows in [1_000, 100_000] {
        let labels: Vec<u8> = (0..rows).map(|i| u8::from(i % 3 == 0)).collect();
        group.bench_with_input(BenchmarkId::new("10_folds", rows), &labels, |b, labels| {
            let splitter = StratifiedKFold::new(10).shuffled(Some(7));
            b.iter(|| splitter.split(black_box(labels)).unwrap());
        });
    }

    group.finish();
}

#[allow(clippy::cast_precision_loss)]
fn bench_roc_auc(c: &mut Criterion) {
    let rows = 100_000;
    let labels: Vec<u8> = (0..rows).map(|i| u8::from(i % 2 == 0)).collect();
    // coarse scores produce many ties
    let scores: Vec<f64> = (0..rows).map(|i| ((i * 37) % 101) as f64 / 100.0).collect();

    c.bench_function("roc_auc_100k", |b| {
        b.iter(|| roc_auc(black_box(&labels), black_box(&scores)));
    });
}

criterion_group!(benches, bench_sample, bench_fold_assignment, bench_roc_auc);
criterion_main!(benches);
