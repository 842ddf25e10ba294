//! Criterion benches for the confounds hot loops (DVARS and PCA).
//!
//! Inputs are seed-deterministic so results are comparable over time.
//! Throughput is reported in volumes for DVARS and matrix cells for PCA.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use spineprep_confounds::{dvars, principal_components};
use spineprep_core::synth::{full_mask, noisy_series};

fn bench_dvars(c: &mut Criterion) {
    let mut group = c.benchmark_group("dvars");

    for &t in &[50usize, 200usize] {
        let vol = noisy_series([32, 32, 12, t], 2024, 2.0);
        let mask = full_mask(&vol);
        group.throughput(Throughput::Elements(t as u64));
        group.bench_function(BenchmarkId::new("masked", t), |b| {
            b.iter(|| dvars(black_box(&vol), Some(black_box(&mask))).unwrap());
        });
    }
    group.finish();
}

fn bench_pca(c: &mut Criterion) {
    let mut group = c.benchmark_group("pca");

    for &(t, v) in &[(60usize, 500usize), (120usize, 2000usize)] {
        let series = noisy_series([v, 1, 1, t], 7, 2.0);
        let mut x = Array2::zeros((t, v));
        for i in 0..t {
            let row = series.vol(i);
            for j in 0..v {
                x[[i, j]] = f64::from(row[j]);
            }
        }
        group.throughput(Throughput::Elements((t * v) as u64));
        group.bench_function(BenchmarkId::new("jacobi", format!("{t}x{v}")), |b| {
            b.iter(|| principal_components(black_box(&x), 5));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dvars, bench_pca);
criterion_main!(benches);
