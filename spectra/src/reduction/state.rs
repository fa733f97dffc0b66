//! Data carried between reduction stages.

use common::{BitBuffer2, Buffer2};

use crate::combine::CombinedFrame;
use crate::objects::DetectedObject;
use crate::quality::CompositeMask;
use crate::slits::{SlitGeometry, SlitSelection};

/// Completed reduction stages, in dependency order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum ReductionStage {
    Combined,
    ObjectsFound,
    GlobalSkySubtracted,
    /// Objects found across every echelle order on the sky-subtracted image.
    OrderObjectsFound,
    LocallyExtracted,
}

/// Models written by local sky subtraction and extraction.
#[derive(Debug, Clone)]
pub struct ExtractionProducts {
    pub sky_model: Buffer2<f32>,
    pub object_model: Buffer2<f32>,
    pub ivar_model: Buffer2<f32>,
    /// `true` where a pixel was usable for extraction.
    pub extraction_mask: BitBuffer2,
    /// Composite mask with the extraction bit added.
    pub output_mask: CompositeMask,
}

/// Everything a reduction has produced so far.
///
/// Products are only ever written by the [`Reduction`](super::Reduction)
/// driver; this type exposes them read-only.
#[derive(Debug, Clone)]
pub struct ReductionState {
    pub(super) frame: CombinedFrame,
    pub(super) geometry: Option<SlitGeometry>,
    pub(super) selection: SlitSelection,
    pub(super) tilts: Option<Buffer2<f32>>,
    pub(super) sky_mask: Option<BitBuffer2>,
    pub(super) object_mask: Option<BitBuffer2>,
    pub(super) global_sky: Option<Buffer2<f32>>,
    pub(super) objects: Vec<DetectedObject>,
    pub(super) extraction: Option<ExtractionProducts>,
    pub(super) steps: Vec<ReductionStage>,
    pub(super) stage: ReductionStage,
}

impl ReductionState {
    pub(super) fn new(frame: CombinedFrame) -> Self {
        Self {
            frame,
            geometry: None,
            selection: SlitSelection::default(),
            tilts: None,
            sky_mask: None,
            object_mask: None,
            global_sky: None,
            objects: Vec::new(),
            extraction: None,
            steps: vec![ReductionStage::Combined],
            stage: ReductionStage::Combined,
        }
    }

    /// Record a completed stage. Later products become stale and are dropped.
    pub(super) fn enter(&mut self, stage: ReductionStage) {
        if stage < ReductionStage::LocallyExtracted {
            self.extraction = None;
        }
        self.stage = stage;
        self.steps.push(stage);
    }

    pub fn stage(&self) -> ReductionStage {
        self.stage
    }

    /// Every completed stage in execution order, reruns included.
    pub fn steps(&self) -> &[ReductionStage] {
        &self.steps
    }

    pub fn frame(&self) -> &CombinedFrame {
        &self.frame
    }

    pub fn image(&self) -> &Buffer2<f32> {
        &self.frame.image
    }

    pub fn ivar(&self) -> &Buffer2<f32> {
        &self.frame.ivar
    }

    pub fn read_noise2(&self) -> &Buffer2<f32> {
        &self.frame.read_noise2
    }

    pub fn cr_mask(&self) -> &BitBuffer2 {
        &self.frame.cr_mask
    }

    /// Current composite mask.
    pub fn mask(&self) -> &CompositeMask {
        &self.frame.mask
    }

    pub fn geometry(&self) -> Option<&SlitGeometry> {
        self.geometry.as_ref()
    }

    pub fn selection(&self) -> &SlitSelection {
        &self.selection
    }

    pub fn tilts(&self) -> Option<&Buffer2<f32>> {
        self.tilts.as_ref()
    }

    /// Pixels usable for sky fitting, from object finding.
    pub fn sky_mask(&self) -> Option<&BitBuffer2> {
        self.sky_mask.as_ref()
    }

    /// Pixels carrying object flux, from object finding.
    pub fn object_mask(&self) -> Option<&BitBuffer2> {
        self.object_mask.as_ref()
    }

    pub fn global_sky(&self) -> Option<&Buffer2<f32>> {
        self.global_sky.as_ref()
    }

    pub fn objects(&self) -> &[DetectedObject] {
        &self.objects
    }

    pub fn extraction(&self) -> Option<&ExtractionProducts> {
        self.extraction.as_ref()
    }

    pub fn is_difference(&self) -> bool {
        self.frame.is_difference()
    }

    pub fn num_frames(&self) -> usize {
        self.frame.num_frames()
    }
}
