//! Test fixtures and in-memory collaborators.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::{BitBuffer2, Buffer2};

use crate::combine::CombinedFrame;
use crate::objects::{DetectedObject, ExtractedSpectrum};
use crate::quality::{build_quality_mask, MaskInputs};
use crate::services::{
    Binning, CalibrationSet, CosmicRayDetector, CosmicRayRequest, DetectorProperties,
    FrameProcessor, GlobalSkyFitter, GlobalSkyRequest, LocalSkyExtractor, LocalSkyRequest,
    LocalSkyResult, ObjectFindRequest, ObjectFindResult, ObjectFinder, OrderFindRequest,
    ProcessFlags, ProcessedFrame, ServiceResult,
};
use crate::slits::{EdgeTraces, SlitGeometry, SlitMap};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Scenes
// ============================================================================

/// Width of the three-slit scene.
pub const SCENE_WIDTH: usize = 14;
/// Height of the three-slit scene.
pub const SCENE_HEIGHT: usize = 8;

/// Three straight slits covering columns 1-3, 5-7 and 9-11.
/// Columns 0, 4, 8, 12 and 13 are off-slit.
pub fn three_slit_geometry() -> SlitGeometry {
    let edges = EdgeTraces::vertical(&[(1.0, 3.0), (5.0, 7.0), (9.0, 11.0)], SCENE_HEIGHT);
    let map = SlitMap::from_edges(&edges, Binning::default(), SCENE_WIDTH, SCENE_HEIGHT);
    SlitGeometry::new(edges, map).unwrap()
}

/// Tilts or wavelength image of the scene: the row index.
pub fn row_image() -> Buffer2<f32> {
    Buffer2::from_fn(SCENE_WIDTH, SCENE_HEIGHT, |_, y| y as f32)
}

/// A calibrated frame with constant value, variance and read noise.
pub fn constant_frame(width: usize, height: usize, value: f32, variance: f32) -> ProcessedFrame {
    ProcessedFrame {
        image: Buffer2::new_filled(width, height, value),
        raw_variance: Buffer2::new_filled(width, height, variance),
        read_noise2: Buffer2::new_filled(width, height, 4.0),
    }
}

/// A single-exposure combined frame with unit inverse variance and no defects.
pub fn combined_frame(image: Buffer2<f32>) -> CombinedFrame {
    let (width, height) = image.shape();
    let ivar = Buffer2::new_filled(width, height, 1.0);
    let cr_mask = BitBuffer2::new_default(width, height);
    let bpm = BitBuffer2::new_default(width, height);
    let mask = build_quality_mask(
        &MaskInputs {
            image: &image,
            ivar: &ivar,
            cr_mask: &cr_mask,
            bpm: &bpm,
            slit_map: None,
        },
        &DetectorProperties::default(),
        true,
    );
    CombinedFrame {
        image,
        ivar,
        read_noise2: Buffer2::new_filled(width, height, 4.0),
        cr_mask,
        mask,
        bpm,
        n_science: 1,
        n_background: 0,
    }
}

pub fn calibrations(width: usize, height: usize) -> CalibrationSet {
    CalibrationSet {
        bpm: Some(BitBuffer2::new_default(width, height)),
        ..CalibrationSet::default()
    }
}

// ============================================================================
// Frame processing
// ============================================================================

/// Serves pre-built frames by path.
#[derive(Debug, Default)]
pub struct MockProcessor {
    frames: HashMap<PathBuf, ProcessedFrame>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, path: impl AsRef<Path>, frame: ProcessedFrame) -> Self {
        self.frames.insert(path.as_ref().to_path_buf(), frame);
        self
    }
}

impl FrameProcessor for MockProcessor {
    fn process(
        &self,
        path: &Path,
        _calibrations: &CalibrationSet,
        _flags: ProcessFlags,
    ) -> ServiceResult<ProcessedFrame> {
        self.frames
            .get(path)
            .cloned()
            .ok_or_else(|| format!("cannot open {}", path.display()).into())
    }
}

// ============================================================================
// Cosmic rays
// ============================================================================

#[derive(Debug, Default)]
pub struct NoCosmicRays;

impl CosmicRayDetector for NoCosmicRays {
    fn detect(&self, request: &CosmicRayRequest<'_>) -> ServiceResult<BitBuffer2> {
        Ok(BitBuffer2::new_default(
            request.image.width(),
            request.image.height(),
        ))
    }
}

/// Flags every pixel at or above `threshold` and counts its calls.
#[derive(Debug)]
pub struct ThresholdCosmicRays {
    pub threshold: f32,
    pub calls: RefCell<usize>,
}

impl ThresholdCosmicRays {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            calls: RefCell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl CosmicRayDetector for ThresholdCosmicRays {
    fn detect(&self, request: &CosmicRayRequest<'_>) -> ServiceResult<BitBuffer2> {
        *self.calls.borrow_mut() += 1;
        let image = request.image;
        Ok(BitBuffer2::from_fn(image.width(), image.height(), |i| {
            image[i] >= self.threshold
        }))
    }
}

/// Always fails.
#[derive(Debug, Default)]
pub struct BrokenCosmicRays;

impl CosmicRayDetector for BrokenCosmicRays {
    fn detect(&self, _request: &CosmicRayRequest<'_>) -> ServiceResult<BitBuffer2> {
        Err("detector offline".into())
    }
}

// ============================================================================
// Object finding
// ============================================================================

/// What an all-order search was handed.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSearch {
    pub orders: Vec<usize>,
    pub included: usize,
    pub plate_scale: Vec<f32>,
    pub standard: bool,
    /// Image value at `(2, 0)`.
    pub sample_value: f32,
}

/// Finds one object at the centre of every slit. The centre column is the
/// object mask; the remaining included pixels are sky.
#[derive(Debug, Default)]
pub struct MockObjectFinder {
    pub fail_slits: Vec<usize>,
    /// `(slit, sky_subtracted, included pixels)` of every call.
    pub calls: RefCell<Vec<(usize, bool, usize)>>,
    /// Orders an all-order search reports an object on besides the requested ones.
    pub extra_orders: Vec<usize>,
    pub order_searches: RefCell<Vec<OrderSearch>>,
}

impl MockObjectFinder {
    pub fn failing(slits: &[usize]) -> Self {
        Self {
            fail_slits: slits.to_vec(),
            ..Self::default()
        }
    }
}

impl ObjectFinder for MockObjectFinder {
    fn find(&self, request: &ObjectFindRequest<'_>) -> ServiceResult<ObjectFindResult> {
        let slit = request.slit.metadata.slit;
        self.calls.borrow_mut().push((
            slit,
            request.sky_subtracted,
            request.slit.inclusion.count_ones(),
        ));
        if self.fail_slits.contains(&slit) {
            return Err(format!("no trace on slit {slit}").into());
        }

        let (width, height) = request.image.shape();
        let trace: Vec<f32> = request
            .slit
            .left
            .iter()
            .zip(request.slit.right)
            .map(|(l, r)| 0.5 * (l + r))
            .collect();
        let inclusion = request.slit.inclusion;
        let object_mask = BitBuffer2::from_fn(width, height, |i| {
            let (x, y) = (i % width, i / width);
            inclusion.get(i) && trace.get(y).is_some_and(|&c| c.round() as usize == x)
        });
        let mut sky_mask = inclusion.clone();
        sky_mask.and_not_assign(&object_mask);

        Ok(ObjectFindResult {
            objects: vec![DetectedObject::new(slit, 1, trace)],
            sky_mask,
            object_mask,
        })
    }

    fn find_all_orders(&self, request: &OrderFindRequest<'_>) -> ServiceResult<Vec<DetectedObject>> {
        self.order_searches.borrow_mut().push(OrderSearch {
            orders: request.orders.to_vec(),
            included: request.inclusion.count_ones(),
            plate_scale: request.plate_scale.to_vec(),
            standard: request.std_trace.is_some(),
            sample_value: *request.image.get(2, 0),
        });
        let mut orders = request.orders.to_vec();
        orders.extend(&self.extra_orders);
        Ok(orders
            .into_iter()
            .rev()
            .map(|order| {
                let trace = request
                    .edges
                    .left(order)
                    .iter()
                    .zip(request.edges.right(order))
                    .map(|(l, r)| 0.5 * (l + r))
                    .collect();
                DetectedObject::new(order, 1, trace)
            })
            .collect())
    }
}

// ============================================================================
// Sky fitting and extraction
// ============================================================================

/// Global sky of `level + slit` everywhere in the frame.
#[derive(Debug, Default)]
pub struct MockGlobalSky {
    pub level: f32,
    /// Slits whose model is all zeros.
    pub zero_slits: Vec<usize>,
    pub fail_slits: Vec<usize>,
    /// `(slit, included pixels, enforce_positive)` of every call.
    pub calls: RefCell<Vec<(usize, usize, bool)>>,
}

impl MockGlobalSky {
    pub fn new(level: f32) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    pub fn level_for(&self, slit: usize) -> f32 {
        self.level + slit as f32
    }
}

impl GlobalSkyFitter for MockGlobalSky {
    fn fit(&self, request: &GlobalSkyRequest<'_>) -> ServiceResult<Buffer2<f32>> {
        let slit = request.slit.metadata.slit;
        self.calls.borrow_mut().push((
            slit,
            request.slit.inclusion.count_ones(),
            request.enforce_positive,
        ));
        if self.fail_slits.contains(&slit) {
            return Err("b-spline fit did not converge".into());
        }
        let (width, height) = request.image.shape();
        let level = if self.zero_slits.contains(&slit) {
            0.0
        } else {
            self.level_for(slit)
        };
        Ok(Buffer2::new_filled(width, height, level))
    }
}

/// Local sky of `global + offset`, a unit object model and halved inverse
/// variance everywhere. Pixels outside the inclusion and the listed
/// `reject` pixels are marked unusable for extraction.
#[derive(Debug, Default)]
pub struct MockLocalSky {
    pub offset: f32,
    pub reject: Vec<(usize, usize)>,
    pub fail_slits: Vec<usize>,
    pub calls: RefCell<Vec<usize>>,
    /// `standard_star` of every call.
    pub standard: RefCell<Vec<bool>>,
}

impl MockLocalSky {
    pub fn new(offset: f32) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }
}

impl LocalSkyExtractor for MockLocalSky {
    fn extract(
        &self,
        request: &LocalSkyRequest<'_>,
        objects: &mut [DetectedObject],
    ) -> ServiceResult<LocalSkyResult> {
        let slit = request.slit.metadata.slit;
        self.calls.borrow_mut().push(slit);
        self.standard.borrow_mut().push(request.standard_star);
        if self.fail_slits.contains(&slit) {
            return Err("extraction profile is singular".into());
        }

        let (width, height) = request.image.shape();
        let mut extraction_mask = request.slit.inclusion.clone();
        for &(x, y) in &self.reject {
            extraction_mask.set_xy(x, y, false);
        }
        for object in objects.iter_mut() {
            let column = object.mean_spatial().unwrap_or(0.0).round() as usize;
            object.spectrum = Some(ExtractedSpectrum {
                flux: vec![1.0; height],
                ivar: vec![1.0; height],
                wave: (0..height)
                    .map(|y| *request.wave_image.get(column.min(width - 1), y))
                    .collect(),
            });
        }

        Ok(LocalSkyResult {
            sky_model: request.global_sky.map(|&v| v + self.offset),
            object_model: Buffer2::new_filled(width, height, 1.0),
            ivar_model: request.ivar.map(|&v| 0.5 * v),
            extraction_mask,
        })
    }
}
