//! Collaborator contracts consumed by the reduction core.
//!
//! The numerical kernels (frame calibration, sky fitting, object finding,
//! optimal extraction) live outside this crate. They are reached through the
//! traits below and treated as pure functions of their inputs. Every fallible
//! call returns [`ServiceResult`] so implementations can surface their own
//! error types.

use std::path::Path;

use serde::{Deserialize, Serialize};

use common::{BitBuffer2, Buffer2};

use crate::config::CosmicRayConfig;
use crate::objects::{DetectedObject, HandExtraction};
use crate::quality::CompositeMask;
use crate::slits::{EdgeTraces, SlitMap};

/// Error returned by a collaborator.
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

pub type ServiceResult<T> = Result<T, ServiceError>;

// ============================================================================
// Detector and processing records
// ============================================================================

/// Detector levels used by mask building and cosmic-ray detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorProperties {
    /// Counts at or above this value are saturated.
    pub saturation: f32,
    /// Fraction of `saturation` where the response stops being linear.
    pub nonlinear: f32,
    /// Counts at or below this value are flagged by the minimum-counts check.
    pub min_counts: f32,
}

impl Default for DetectorProperties {
    fn default() -> Self {
        Self {
            saturation: 65535.0,
            nonlinear: 0.95,
            min_counts: -1.0e10,
        }
    }
}

impl DetectorProperties {
    /// Counts above which the detector response is no longer trusted.
    pub fn nonlinear_level(&self) -> f32 {
        self.saturation * self.nonlinear
    }
}

/// On-chip binning factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    pub spectral: usize,
    pub spatial: usize,
}

impl Default for Binning {
    fn default() -> Self {
        Self {
            spectral: 1,
            spatial: 1,
        }
    }
}

/// Steps applied when turning a raw frame into a calibrated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessFlags {
    pub bias_subtract: bool,
    pub flat_field: bool,
    pub apply_gain: bool,
    pub trim: bool,
}

impl Default for ProcessFlags {
    fn default() -> Self {
        Self {
            bias_subtract: true,
            flat_field: true,
            apply_gain: true,
            trim: true,
        }
    }
}

/// Calibration products handed to the frame processor.
///
/// The bad-pixel mask is required by frame combination; the others are
/// optional and passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct CalibrationSet {
    pub bias: Option<Buffer2<f32>>,
    pub pixel_flat: Option<Buffer2<f32>>,
    pub illum_flat: Option<Buffer2<f32>>,
    pub bpm: Option<BitBuffer2>,
}

/// A calibrated frame in physical units.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub image: Buffer2<f32>,
    /// Variance before any stacking: shot noise plus read noise.
    pub raw_variance: Buffer2<f32>,
    pub read_noise2: Buffer2<f32>,
}

// ============================================================================
// Per-slit request context
// ============================================================================

/// Identification of the slit a collaborator call is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlitMetadata {
    pub slit: usize,
    pub num_slits: usize,
    /// 1-based detector index.
    pub detector: usize,
    pub binning: Binning,
}

/// Geometry and pixel selection of one slit.
#[derive(Debug, Clone, Copy)]
pub struct SlitContext<'a> {
    pub metadata: SlitMetadata,
    pub left: &'a [f32],
    pub right: &'a [f32],
    /// Pixels of this slit that may be used.
    pub inclusion: &'a BitBuffer2,
}

/// Input of a cosmic-ray detection pass.
#[derive(Debug, Clone, Copy)]
pub struct CosmicRayRequest<'a> {
    pub image: &'a Buffer2<f32>,
    pub variance: &'a Buffer2<f32>,
    pub detector: DetectorProperties,
    /// Thresholds after the spectrograph's per-instrument override.
    pub params: CosmicRayConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectFindRequest<'a> {
    /// Raw or sky-subtracted science image.
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub input_mask: &'a CompositeMask,
    pub slit: SlitContext<'a>,
    pub hand_extraction: &'a [HandExtraction],
    pub max_objects: usize,
    pub sky_subtracted: bool,
}

/// Input of a search across every echelle order at once.
#[derive(Debug, Clone, Copy)]
pub struct OrderFindRequest<'a> {
    /// Globally sky-subtracted science image.
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub input_mask: &'a CompositeMask,
    pub slit_map: &'a SlitMap,
    pub edges: &'a EdgeTraces,
    /// Usable pixels of the whole frame: composite mask clear and no cosmic ray.
    pub inclusion: &'a BitBuffer2,
    /// Orders still selected, ascending.
    pub orders: &'a [usize],
    /// Arcseconds per spatial pixel, one entry per order.
    pub plate_scale: &'a [f32],
    /// Spatial trace of a standard star, one value per spectral row.
    pub std_trace: Option<&'a [f32]>,
    /// 1-based detector index.
    pub detector: usize,
    pub binning: Binning,
    pub hand_extraction: &'a [HandExtraction],
    pub max_objects: usize,
}

#[derive(Debug, Clone)]
pub struct ObjectFindResult {
    pub objects: Vec<DetectedObject>,
    /// Full-frame mask of pixels usable for sky fitting.
    pub sky_mask: BitBuffer2,
    /// Full-frame mask of pixels carrying object flux.
    pub object_mask: BitBuffer2,
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalSkyRequest<'a> {
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub tilts: &'a Buffer2<f32>,
    pub input_mask: &'a CompositeMask,
    pub slit: SlitContext<'a>,
    pub bspline_spacing: f32,
    pub enforce_positive: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LocalSkyRequest<'a> {
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub tilts: &'a Buffer2<f32>,
    pub wave_image: &'a Buffer2<f32>,
    pub global_sky: &'a Buffer2<f32>,
    pub read_noise2: &'a Buffer2<f32>,
    pub input_mask: &'a CompositeMask,
    pub slit: SlitContext<'a>,
    pub bspline_spacing: f32,
    /// The target is a standard star: bright, with a well-defined profile.
    pub standard_star: bool,
}

/// Full-frame models from local sky subtraction and extraction. Only the
/// current slit's pixels are read back.
#[derive(Debug, Clone)]
pub struct LocalSkyResult {
    pub sky_model: Buffer2<f32>,
    pub object_model: Buffer2<f32>,
    pub ivar_model: Buffer2<f32>,
    /// `true` where the pixel was usable for extraction.
    pub extraction_mask: BitBuffer2,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Instrument-specific knowledge the core needs.
pub trait Spectrograph {
    fn name(&self) -> &str;

    /// Properties of the 1-based detector `det`, `None` if it does not exist.
    fn detector_properties(&self, det: usize) -> Option<DetectorProperties>;

    /// `(sigma_clip, obj_limit)` for cosmic-ray detection at this binning.
    fn cosmic_ray_params(&self, config: &CosmicRayConfig, _binning: Binning) -> (f32, f32) {
        (config.sigma_clip, config.obj_limit)
    }

    /// Slit membership image for the given edges.
    fn slitmask(&self, edges: &EdgeTraces, binning: Binning, width: usize, height: usize) -> SlitMap {
        SlitMap::from_edges(edges, binning, width, height)
    }

    /// Arcseconds per binned spatial pixel of every order. One arcsecond per
    /// unbinned pixel unless the instrument knows better.
    fn order_platescale(&self, num_orders: usize, binning: Binning) -> Vec<f32> {
        vec![binning.spatial.max(1) as f32; num_orders]
    }
}

/// Turns a raw exposure into a calibrated image with its noise images.
pub trait FrameProcessor {
    fn process(
        &self,
        path: &Path,
        calibrations: &CalibrationSet,
        flags: ProcessFlags,
    ) -> ServiceResult<ProcessedFrame>;
}

pub trait CosmicRayDetector {
    fn detect(&self, request: &CosmicRayRequest<'_>) -> ServiceResult<BitBuffer2>;
}

pub trait ObjectFinder {
    fn find(&self, request: &ObjectFindRequest<'_>) -> ServiceResult<ObjectFindResult>;

    /// Search every order of an echelle frame in one pass. Objects carry the
    /// order they were found on in `slit`.
    fn find_all_orders(&self, _request: &OrderFindRequest<'_>) -> ServiceResult<Vec<DetectedObject>> {
        Err("object finder cannot search all orders at once".into())
    }
}

pub trait GlobalSkyFitter {
    /// Full-frame sky model; only the slit's pixels are used.
    fn fit(&self, request: &GlobalSkyRequest<'_>) -> ServiceResult<Buffer2<f32>>;
}

pub trait LocalSkyExtractor {
    /// Fit the local sky and extract `objects`, filling in their measured fields.
    fn extract(
        &self,
        request: &LocalSkyRequest<'_>,
        objects: &mut [DetectedObject],
    ) -> ServiceResult<LocalSkyResult>;
}

// ============================================================================
// Generic spectrograph
// ============================================================================

/// Spectrograph with identical detectors and no geometry quirks.
///
/// Defaults match a DEIMOS-like mosaic: 8 detectors saturating at 65535
/// counts, non-linear above 95%, no practical minimum-counts floor and
/// 0.1185 arcseconds per unbinned pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericSpectrograph {
    pub name: String,
    pub detectors: Vec<DetectorProperties>,
    /// Replaces the configured `(sigma_clip, obj_limit)` when set.
    pub cosmic_ray_override: Option<(f32, f32)>,
    /// Arcseconds per unbinned spatial pixel, shared by every order.
    pub platescale: f32,
}

impl Default for GenericSpectrograph {
    fn default() -> Self {
        Self {
            name: "generic".to_string(),
            detectors: vec![DetectorProperties::default(); 8],
            cosmic_ray_override: None,
            platescale: 0.1185,
        }
    }
}

impl GenericSpectrograph {
    pub fn with_detector(detector: DetectorProperties) -> Self {
        Self {
            detectors: vec![detector],
            ..Self::default()
        }
    }
}

impl Spectrograph for GenericSpectrograph {
    fn name(&self) -> &str {
        &self.name
    }

    fn detector_properties(&self, det: usize) -> Option<DetectorProperties> {
        det.checked_sub(1)
            .and_then(|i| self.detectors.get(i))
            .copied()
    }

    fn cosmic_ray_params(&self, config: &CosmicRayConfig, _binning: Binning) -> (f32, f32) {
        self.cosmic_ray_override
            .unwrap_or((config.sigma_clip, config.obj_limit))
    }

    fn order_platescale(&self, num_orders: usize, binning: Binning) -> Vec<f32> {
        vec![self.platescale * binning.spatial.max(1) as f32; num_orders]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_detectors_are_one_based() {
        let spec = GenericSpectrograph::default();
        assert_eq!(spec.detector_properties(0), None);
        assert_eq!(spec.detector_properties(1), Some(DetectorProperties::default()));
        assert!(spec.detector_properties(8).is_some());
        assert_eq!(spec.detector_properties(9), None);
    }

    #[test]
    fn test_detector_defaults() {
        let det = DetectorProperties::default();
        assert_eq!(det.saturation, 65535.0);
        assert_eq!(det.min_counts, -1.0e10);
        assert!((det.nonlinear_level() - 62258.25).abs() < 0.01);
    }

    #[test]
    fn test_cosmic_ray_params_override() {
        let config = CosmicRayConfig::default();
        let mut spec = GenericSpectrograph::default();
        assert_eq!(
            spec.cosmic_ray_params(&config, Binning::default()),
            (config.sigma_clip, config.obj_limit)
        );
        spec.cosmic_ray_override = Some((4.0, 1.5));
        assert_eq!(spec.cosmic_ray_params(&config, Binning::default()), (4.0, 1.5));
    }

    #[test]
    fn test_order_platescale_scales_with_binning() {
        let spec = GenericSpectrograph::default();
        let binned = Binning {
            spectral: 1,
            spatial: 2,
        };
        assert_eq!(spec.order_platescale(2, binned), vec![0.237; 2]);
        assert!(spec.order_platescale(0, binned).is_empty());
    }

    #[test]
    fn test_default_slitmask_rasterises_edges() {
        let spec = GenericSpectrograph::default();
        let edges = EdgeTraces::vertical(&[(0.0, 1.0)], 1);
        let map = spec.slitmask(&edges, Binning::default(), 3, 1);
        assert_eq!(map.buffer().row(0), &[0, 0, -1]);
    }
}
