//! Benchmark for pixel-wise stack combination.
//!
//! Run with: cargo bench -p spectra --bench combine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{BitBuffer2, Buffer2};
use spectra::combine::{stack_frames, FrameProducts, SigmaClip, StackWeights};
use spectra::CompositeMask;

const WIDTH: usize = 512;
const HEIGHT: usize = 1024;

fn synthetic_frames(count: usize, seed: u64) -> Vec<FrameProducts> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let pixels: Vec<f32> = (0..WIDTH * HEIGHT)
                .map(|_| 1000.0 + rng.random_range(-30.0..30.0))
                .collect();
            FrameProducts {
                image: Buffer2::new(WIDTH, HEIGHT, pixels),
                ivar: Buffer2::new_filled(WIDTH, HEIGHT, 1.0 / 1000.0),
                read_noise2: Buffer2::new_filled(WIDTH, HEIGHT, 9.0),
                cr_mask: BitBuffer2::new_default(WIDTH, HEIGHT),
                mask: CompositeMask::new_default(WIDTH, HEIGHT),
            }
        })
        .collect()
}

fn combine_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("stack_frames");
    group.sample_size(10);

    for count in [3, 5, 10] {
        let frames = synthetic_frames(count, 42);
        let weights = StackWeights::uniform(count);

        group.bench_with_input(BenchmarkId::new("mean", count), &frames, |b, frames| {
            b.iter(|| stack_frames(frames, &weights, None))
        });
        group.bench_with_input(BenchmarkId::new("sigma_clip", count), &frames, |b, frames| {
            b.iter(|| stack_frames(frames, &weights, Some(SigmaClip::new(2.0, 5))))
        });
    }

    group.finish();
}

criterion_group!(benches, combine_benchmarks);
criterion_main!(benches);
