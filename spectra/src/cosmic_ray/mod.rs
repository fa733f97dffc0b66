//! Cosmic-ray detection using the L.A.Cosmic algorithm.
//!
//! Implementation based on van Dokkum 2001, PASP 113, 1420:
//! "Cosmic-Ray Rejection by Laplacian Edge Detection"
//!
//! Each pass computes the Laplacian significance of the working image,
//! removes large-scale structure with a 5x5 median, and rejects compact
//! real sources through the fine-structure contrast. Detected pixels are
//! replaced by the median of their clean neighbours before the next pass.

mod fine_structure;
mod laplacian;

#[cfg(test)]
mod tests;

use thiserror::Error;

use common::{BitBuffer2, Buffer2};

use crate::config::CosmicRayConfig;
use crate::services::{CosmicRayDetector, CosmicRayRequest, DetectorProperties, ServiceResult};

pub use fine_structure::{fine_structure, median_filter, median_of_n};
pub use laplacian::laplacian_peaks;

/// Floor of the noise-normalised fine structure.
const MIN_FINE_STRUCTURE: f32 = 0.01;

/// Floor of the per-pixel noise when neither variance nor counts define it.
const MIN_NOISE: f32 = 1e-6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Variance image is {actual:?} but the science image is {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Built-in detector used when no instrument-specific one is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct LaCosmicDetector;

impl CosmicRayDetector for LaCosmicDetector {
    fn detect(&self, request: &CosmicRayRequest<'_>) -> ServiceResult<BitBuffer2> {
        Ok(detect_cosmic_rays(
            request.image,
            request.variance,
            &request.detector,
            &request.params,
        )?)
    }
}

/// Flag cosmic-ray hits in `image`.
///
/// `variance` gives the per-pixel noise; where it is not positive the
/// Poisson estimate `|image|` is used instead.
pub fn detect_cosmic_rays(
    image: &Buffer2<f32>,
    variance: &Buffer2<f32>,
    detector: &DetectorProperties,
    params: &CosmicRayConfig,
) -> Result<BitBuffer2, Error> {
    if !image.same_shape(variance) {
        return Err(Error::ShapeMismatch {
            expected: image.shape(),
            actual: variance.shape(),
        });
    }

    let (width, height) = image.shape();
    let mut mask = BitBuffer2::new_default(width, height);
    if image.is_empty() {
        return Ok(mask);
    }

    let level = detector.nonlinear_level();
    let saturated = BitBuffer2::from_fn(width, height, |i| !(image[i] < level));
    let grow_threshold = params.sigma_clip * params.sigma_fraction;
    let mut work = image.clone();

    for iteration in 0..params.max_iterations.max(1) {
        let noise = noise_image(&work, variance);
        let significance = significance(&work, &noise);

        let mut found = BitBuffer2::from_fn(width, height, |i| {
            !saturated.get(i) && !mask.get(i) && significance[i] > params.sigma_clip
        });

        if params.remove_compact_sources && found.any() {
            let fine = fine_structure(&work);
            let candidates: Vec<usize> = found.iter_ones().collect();
            for idx in candidates {
                let contrast = (fine[idx] / noise[idx]).max(MIN_FINE_STRUCTURE);
                if significance[idx] / contrast <= params.obj_limit {
                    found.set(idx, false);
                }
            }
        }

        let seeds = found.count_ones();
        if seeds == 0 {
            tracing::debug!(iteration, "No new cosmic rays");
            break;
        }

        grow(&mut found, &significance, &saturated, &mask, params.grow, grow_threshold);
        let grown = found.count_ones();
        mask.or_assign(&found);

        tracing::debug!(iteration, seeds, grown, "Cosmic-ray pass");

        let cleaned = fine_structure::median_filter_excluding(&work, 2, Some(&mask));
        work.copy_where(&cleaned, &found);
    }

    Ok(mask)
}

/// Per-pixel noise: `sqrt(variance)`, or `sqrt(|counts|)` where the variance is unusable.
fn noise_image(work: &Buffer2<f32>, variance: &Buffer2<f32>) -> Buffer2<f32> {
    work.zip_map(variance, |&counts, &var| {
        let noise = if var > 0.0 && var.is_finite() {
            var.sqrt()
        } else {
            counts.abs().sqrt()
        };
        noise.max(MIN_NOISE)
    })
}

/// Laplacian significance with the large-scale structure removed:
/// `S = L / (2 noise)`, `S' = S - med5(S)`.
fn significance(work: &Buffer2<f32>, noise: &Buffer2<f32>) -> Buffer2<f32> {
    let lap = laplacian_peaks(work);
    let s = lap.zip_map(noise, |l, n| l / (2.0 * n));
    let background = median_filter(&s, 2);
    s.zip_map(&background, |a, b| a - b)
}

/// Add neighbours within `radius` of each detection whose significance
/// exceeds `threshold`.
fn grow(
    found: &mut BitBuffer2,
    significance: &Buffer2<f32>,
    saturated: &BitBuffer2,
    previous: &BitBuffer2,
    radius: f32,
    threshold: f32,
) {
    if radius < 1.0 {
        return;
    }
    let (width, height) = significance.shape();
    let reach = radius.floor() as isize;
    let r2 = radius * radius;
    let seeds: Vec<usize> = found.iter_ones().collect();

    for idx in seeds {
        let (x, y) = ((idx % width) as isize, (idx / width) as isize);
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                if (dx * dx + dy * dy) as f32 > r2 {
                    continue;
                }
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let n = ny as usize * width + nx as usize;
                if !saturated.get(n) && !previous.get(n) && significance[n] > threshold {
                    found.set(n, true);
                }
            }
        }
    }
}
