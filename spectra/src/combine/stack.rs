//! Pixel-wise weighted combination of calibrated frames.

use rayon::prelude::*;

use common::{BitBuffer2, Buffer2};

use crate::quality::CompositeMask;

/// Convert a variance image to inverse variance and back.
///
/// Non-positive or non-finite input maps to zero, so undefined pixels stay
/// undefined in both directions.
pub fn ivar_from_variance(values: &Buffer2<f32>) -> Buffer2<f32> {
    values.map(|&v| invert(v))
}

#[inline]
fn invert(v: f32) -> f32 {
    if v > 0.0 && v.is_finite() {
        1.0 / v
    } else {
        0.0
    }
}

/// Per-frame stacking weights.
///
/// Positive weights belong to science exposures, negative ones to
/// background exposures subtracted under difference imaging.
#[derive(Debug, Clone, PartialEq)]
pub struct StackWeights {
    weights: Vec<f32>,
}

impl StackWeights {
    /// `1/N` for every frame.
    pub fn uniform(n: usize) -> Self {
        Self {
            weights: vec![1.0 / n as f32; n],
        }
    }

    /// `+1/N_on` for science frames followed by `-1/N_off` for background frames.
    pub fn difference(n_on: usize, n_off: usize) -> Self {
        let mut weights = vec![1.0 / n_on as f32; n_on];
        weights.extend(vec![-1.0 / n_off as f32; n_off]);
        Self { weights }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weights divided by the largest magnitude of their sign group, so that
    /// equal weights within a group become exactly one.
    fn relative(&self) -> Vec<f64> {
        let max_pos = self
            .weights
            .iter()
            .filter(|w| **w > 0.0)
            .fold(0.0f32, |m, &w| m.max(w));
        let max_neg = self
            .weights
            .iter()
            .filter(|w| **w < 0.0)
            .fold(0.0f32, |m, &w| m.max(-w));
        self.weights
            .iter()
            .map(|&w| {
                if w > 0.0 {
                    (w / max_pos) as f64
                } else if w < 0.0 {
                    (w / max_neg) as f64
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// Iterative median-centred sigma clipping along the stack axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SigmaClip {
    pub sigma: f32,
    pub max_iterations: usize,
}

impl SigmaClip {
    pub fn new(sigma: f32, max_iterations: usize) -> Self {
        assert!(sigma > 0.0, "Sigma must be positive");
        assert!(max_iterations > 0, "Max iterations must be at least 1");
        Self {
            sigma,
            max_iterations,
        }
    }

    /// Clear entries of `valid` whose value lies more than `sigma` standard
    /// deviations from the median of the surviving values.
    ///
    /// The standard deviation is the population deviation about the mean,
    /// as astropy's `SigmaClip(cenfunc='median')` computes it. Clipping stops
    /// when nothing changes, the spread vanishes or no values remain, so a
    /// pixel can lose every frame.
    pub fn reject(&self, values: &[f32], valid: &mut [bool], scratch: &mut Vec<f32>) {
        debug_assert_eq!(values.len(), valid.len());

        for _ in 0..self.max_iterations {
            scratch.clear();
            scratch.extend(
                values
                    .iter()
                    .zip(valid.iter())
                    .filter(|(_, &ok)| ok)
                    .map(|(&v, _)| v),
            );
            let n = scratch.len();
            if n == 0 {
                break;
            }

            let mean = scratch.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            let spread = (scratch
                .iter()
                .map(|&v| (v as f64 - mean).powi(2))
                .sum::<f64>()
                / n as f64)
                .sqrt() as f32;
            if spread < f32::EPSILON {
                break;
            }
            let center = median(scratch);

            let limit = self.sigma * spread;
            let mut rejected = 0;
            for (&v, ok) in values.iter().zip(valid.iter_mut()) {
                if *ok && (v - center).abs() > limit {
                    *ok = false;
                    rejected += 1;
                }
            }
            if rejected == 0 {
                break;
            }
        }
    }
}

/// Mean of the two middle values for even counts.
fn median(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(f32::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Products of one calibrated frame, ready for stacking.
#[derive(Debug, Clone)]
pub struct FrameProducts {
    pub image: Buffer2<f32>,
    pub ivar: Buffer2<f32>,
    pub read_noise2: Buffer2<f32>,
    pub cr_mask: BitBuffer2,
    /// Per-frame composite mask; a frame pixel is used only where it is clear.
    pub mask: CompositeMask,
}

/// Result of [`stack_frames`].
#[derive(Debug, Clone)]
pub struct StackedProducts {
    pub image: Buffer2<f32>,
    pub ivar: Buffer2<f32>,
    pub read_noise2: Buffer2<f32>,
    /// Set only where every frame was flagged.
    pub cr_mask: BitBuffer2,
}

#[derive(Debug, Clone, Copy, Default)]
struct StackedPixel {
    value: f32,
    ivar: f32,
    read_noise2: f32,
    cosmic_ray: bool,
}

/// Accumulates one sign group of a weighted mean.
#[derive(Debug, Clone, Copy, Default)]
struct GroupSums {
    weight: f64,
    weighted_value: f64,
    weighted_variance: f64,
    weighted_read_noise2: f64,
}

impl GroupSums {
    #[inline]
    fn add(&mut self, w: f64, value: f32, variance: f32, read_noise2: f32) {
        self.weight += w;
        self.weighted_value += w * value as f64;
        self.weighted_variance += w * w * variance as f64;
        self.weighted_read_noise2 += w * w * read_noise2 as f64;
    }

    /// `(mean, variance, read_noise2)`; all zero when no weight was used.
    #[inline]
    fn finish(&self) -> (f64, f64, f64) {
        if self.weight == 0.0 {
            return (0.0, 0.0, 0.0);
        }
        let norm = self.weight * self.weight;
        (
            self.weighted_value / self.weight,
            self.weighted_variance / norm,
            self.weighted_read_noise2 / norm,
        )
    }
}

/// Weighted combination of `frames`.
///
/// Positive and negative weight groups are each normalised by the weight
/// they actually used at a pixel and then added, so a difference stack is
/// `mean(on) - mean(off)` regardless of masking. Variance and read noise
/// propagate as `sum(w^2 var) / sum(w)^2` per group. A pixel with no usable
/// frame is left at zero with zero inverse variance.
pub fn stack_frames(
    frames: &[FrameProducts],
    weights: &StackWeights,
    clip: Option<SigmaClip>,
) -> StackedProducts {
    assert!(!frames.is_empty(), "No frames to stack");
    assert_eq!(frames.len(), weights.len(), "One weight per frame required");
    let (width, height) = frames[0].image.shape();
    for frame in frames {
        assert_eq!(frame.image.shape(), (width, height), "Frame shape mismatch");
    }

    let relative = weights.relative();
    let n = frames.len();

    let pixels: Vec<StackedPixel> = (0..width * height)
        .into_par_iter()
        .with_min_len(width.max(1))
        .map_init(
            || (vec![0.0f32; n], vec![false; n], Vec::with_capacity(n)),
            |(values, valid, scratch), idx| {
                for (k, frame) in frames.iter().enumerate() {
                    values[k] = frame.image[idx];
                    valid[k] = frame.mask[idx] == 0;
                }
                if let Some(clip) = clip {
                    clip.reject(values, valid, scratch);
                }

                let mut positive = GroupSums::default();
                let mut negative = GroupSums::default();
                for (k, frame) in frames.iter().enumerate() {
                    if !valid[k] {
                        continue;
                    }
                    let w = relative[k];
                    let variance = invert(frame.ivar[idx]);
                    let group = if w >= 0.0 { &mut positive } else { &mut negative };
                    group.add(w.abs(), values[k], variance, frame.read_noise2[idx]);
                }

                let (on, on_var, on_rn) = positive.finish();
                let (off, off_var, off_rn) = negative.finish();
                let variance = on_var + off_var;

                StackedPixel {
                    value: (on - off) as f32,
                    ivar: if variance > 0.0 { (1.0 / variance) as f32 } else { 0.0 },
                    read_noise2: (on_rn + off_rn) as f32,
                    cosmic_ray: frames.iter().all(|f| f.cr_mask.get(idx)),
                }
            },
        )
        .collect();

    StackedProducts {
        image: Buffer2::new(width, height, pixels.iter().map(|p| p.value).collect()),
        ivar: Buffer2::new(width, height, pixels.iter().map(|p| p.ivar).collect()),
        read_noise2: Buffer2::new(width, height, pixels.iter().map(|p| p.read_noise2).collect()),
        cr_mask: BitBuffer2::from_fn(width, height, |i| pixels[i].cosmic_ray),
    }
}
