//! Stacking of raw science exposures into one noise-characterised frame.
//!
//! Every exposure is calibrated by the [`FrameProcessor`], gets its own
//! inverse variance, cosmic-ray mask and composite mask, and is then combined
//! pixel by pixel with [`stack_frames`]. Difference imaging (science minus
//! background exposures) defers cosmic-ray detection until after the
//! subtraction so real negative flux is not mistaken for defects.

mod error;
mod stack;


use std::path::{Path, PathBuf};

use common::{BitBuffer2, Buffer2};

pub use error::Error;
pub use stack::{
    ivar_from_variance, stack_frames, FrameProducts, SigmaClip, StackWeights, StackedProducts,
};

use crate::config::{CombineConfig, CosmicRayConfig};
use crate::quality::{build_quality_mask, CompositeMask, MaskInputs};
use crate::services::{
    CalibrationSet, CosmicRayDetector, CosmicRayRequest, DetectorProperties, FrameProcessor,
    ProcessFlags,
};

/// Whether a frame is a science exposure or a background exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FrameRole {
    Science,
    Background,
}

/// Exposures to combine. A non-empty background list means difference imaging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSet {
    pub science: Vec<PathBuf>,
    pub background: Vec<PathBuf>,
}

impl FrameSet {
    pub fn science<P: AsRef<Path>>(paths: &[P]) -> Self {
        Self {
            science: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            background: Vec::new(),
        }
    }

    pub fn with_background<P: AsRef<Path>>(mut self, paths: &[P]) -> Self {
        self.background = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    pub fn is_difference(&self) -> bool {
        !self.background.is_empty()
    }

    pub fn len(&self) -> usize {
        self.science.len() + self.background.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Science frames first, then background frames, with their index in their own list.
    fn iter(&self) -> impl Iterator<Item = (FrameRole, usize, &Path)> {
        let science = self
            .science
            .iter()
            .enumerate()
            .map(|(i, p)| (FrameRole::Science, i, p.as_path()));
        let background = self
            .background
            .iter()
            .enumerate()
            .map(|(i, p)| (FrameRole::Background, i, p.as_path()));
        science.chain(background)
    }
}

/// The stacked science frame.
#[derive(Debug, Clone)]
pub struct CombinedFrame {
    pub image: Buffer2<f32>,
    pub ivar: Buffer2<f32>,
    pub read_noise2: Buffer2<f32>,
    pub cr_mask: BitBuffer2,
    pub mask: CompositeMask,
    pub bpm: BitBuffer2,
    pub n_science: usize,
    pub n_background: usize,
}

impl CombinedFrame {
    pub fn is_difference(&self) -> bool {
        self.n_background > 0
    }

    pub fn num_frames(&self) -> usize {
        self.n_science + self.n_background
    }

    pub fn shape(&self) -> (usize, usize) {
        self.image.shape()
    }
}

/// Reads, calibrates and stacks exposures.
pub struct FrameCombiner<'a> {
    processor: &'a dyn FrameProcessor,
    cosmic_ray: &'a dyn CosmicRayDetector,
    detector: DetectorProperties,
    cosmic_ray_params: CosmicRayConfig,
    process: ProcessFlags,
    combine: CombineConfig,
}

impl<'a> FrameCombiner<'a> {
    /// `cosmic_ray_params` must already carry the spectrograph's
    /// `(sigma_clip, obj_limit)` for this binning.
    pub fn new(
        processor: &'a dyn FrameProcessor,
        cosmic_ray: &'a dyn CosmicRayDetector,
        detector: DetectorProperties,
        cosmic_ray_params: CosmicRayConfig,
    ) -> Self {
        Self {
            processor,
            cosmic_ray,
            detector,
            cosmic_ray_params,
            process: ProcessFlags::default(),
            combine: CombineConfig::default(),
        }
    }

    pub fn with_process_flags(mut self, process: ProcessFlags) -> Self {
        self.process = process;
        self
    }

    pub fn with_combine_config(mut self, combine: CombineConfig) -> Self {
        self.combine = combine;
        self
    }

    /// Combine `frames` into a single science frame.
    pub fn combine(
        &self,
        frames: &FrameSet,
        calibrations: &CalibrationSet,
    ) -> Result<CombinedFrame, Error> {
        if frames.science.is_empty() {
            return Err(Error::NoScienceFrames);
        }
        let difference = frames.is_difference();
        if self.combine.sigma_clip && difference {
            return Err(Error::SigmaClipWithDifferenceImaging);
        }
        if self.combine.sigma_clip {
            let sigma = self.combine.sigma_for(frames.science.len());
            if sigma.is_nan() || sigma <= 0.0 {
                return Err(Error::InvalidSigma { sigma });
            }
        }
        let bpm = calibrations.bpm.as_ref().ok_or(Error::MissingBadPixelMask)?;

        tracing::info!(
            science = frames.science.len(),
            background = frames.background.len(),
            sigma_clip = self.combine.sigma_clip,
            "Combining frames"
        );

        let mut products: Vec<FrameProducts> = Vec::with_capacity(frames.len());
        let mut shape: Option<(usize, usize)> = None;
        for (role, index, path) in frames.iter() {
            let frame =
                self.load_frame(role, index, path, calibrations, bpm, &mut shape, difference)?;
            products.push(frame);
        }

        if products.len() == 1 {
            let FrameProducts {
                image,
                ivar,
                read_noise2,
                cr_mask,
                mask,
            } = products.remove(0);
            tracing::info!("Single frame, skipping stack");
            return Ok(CombinedFrame {
                image,
                ivar,
                read_noise2,
                cr_mask,
                mask,
                bpm: bpm.clone(),
                n_science: 1,
                n_background: 0,
            });
        }

        let weights = if difference {
            StackWeights::difference(frames.science.len(), frames.background.len())
        } else {
            StackWeights::uniform(frames.science.len())
        };
        let clip = self.sigma_clip(frames);

        let StackedProducts {
            image,
            ivar,
            read_noise2,
            mut cr_mask,
        } = stack_frames(&products, &weights, clip);
        drop(products);

        if difference {
            let variance = ivar_from_variance(&ivar);
            cr_mask = self.detect_cosmic_rays(&image, &variance)?;
        }

        let mask = build_quality_mask(
            &MaskInputs {
                image: &image,
                ivar: &ivar,
                cr_mask: &cr_mask,
                bpm,
                slit_map: None,
            },
            &self.detector,
            !difference,
        );

        tracing::info!(
            frames = frames.len(),
            cosmic_rays = cr_mask.count_ones(),
            masked = mask.iter().filter(|&&v| v != 0).count(),
            "Frames combined"
        );

        Ok(CombinedFrame {
            image,
            ivar,
            read_noise2,
            cr_mask,
            mask,
            bpm: bpm.clone(),
            n_science: frames.science.len(),
            n_background: frames.background.len(),
        })
    }

    /// Clipping applies to science-only stacks of three or more frames.
    fn sigma_clip(&self, frames: &FrameSet) -> Option<SigmaClip> {
        let n = frames.science.len();
        if !self.combine.sigma_clip || frames.is_difference() || n < 3 {
            return None;
        }
        let sigma = self.combine.sigma_for(n);
        tracing::debug!(frames = n, sigma, "Sigma clipping across the stack");
        Some(SigmaClip::new(sigma, self.combine.max_iterations.max(1)))
    }

    #[allow(clippy::too_many_arguments)]
    fn load_frame(
        &self,
        role: FrameRole,
        index: usize,
        path: &Path,
        calibrations: &CalibrationSet,
        bpm: &BitBuffer2,
        shape: &mut Option<(usize, usize)>,
        difference: bool,
    ) -> Result<FrameProducts, Error> {
        let processed = self
            .processor
            .process(path, calibrations, self.process)
            .map_err(|source| Error::FrameProcessing {
                role,
                path: path.to_path_buf(),
                source,
            })?;

        let actual = processed.image.shape();
        let expected = *shape.get_or_insert(actual);
        for found in [
            actual,
            processed.raw_variance.shape(),
            processed.read_noise2.shape(),
        ] {
            if found != expected {
                return Err(Error::DimensionMismatch {
                    role,
                    index,
                    expected,
                    actual: found,
                });
            }
        }
        if (bpm.width(), bpm.height()) != expected {
            return Err(Error::BadPixelMaskShape {
                expected,
                actual: (bpm.width(), bpm.height()),
            });
        }

        let ivar = ivar_from_variance(&processed.raw_variance);
        let cr_mask = if difference {
            BitBuffer2::new_default(expected.0, expected.1)
        } else {
            self.detect_cosmic_rays(&processed.image, &processed.raw_variance)?
        };
        let mask = build_quality_mask(
            &MaskInputs {
                image: &processed.image,
                ivar: &ivar,
                cr_mask: &cr_mask,
                bpm,
                slit_map: None,
            },
            &self.detector,
            true,
        );

        tracing::debug!(
            %role,
            index,
            path = %path.display(),
            cosmic_rays = cr_mask.count_ones(),
            "Frame loaded"
        );

        Ok(FrameProducts {
            image: processed.image,
            ivar,
            read_noise2: processed.read_noise2,
            cr_mask,
            mask,
        })
    }

    fn detect_cosmic_rays(
        &self,
        image: &Buffer2<f32>,
        variance: &Buffer2<f32>,
    ) -> Result<BitBuffer2, Error> {
        let mask = self
            .cosmic_ray
            .detect(&CosmicRayRequest {
                image,
                variance,
                detector: self.detector,
                params: self.cosmic_ray_params,
            })
            .map_err(|source| Error::CosmicRay { source })?;
        if !image.same_shape_as_bits(&mask) {
            return Err(Error::CosmicRay {
                source: format!(
                    "detector returned a {}x{} mask for a {}x{} image",
                    mask.width(),
                    mask.height(),
                    image.width(),
                    image.height()
                )
                .into(),
            });
        }
        Ok(mask)
    }
}
