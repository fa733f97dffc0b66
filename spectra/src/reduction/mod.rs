//! Slit-by-slit reduction of a combined science frame.
//!
//! A [`Reduction`] walks the stages
//! `Combined -> ObjectsFound -> GlobalSkySubtracted -> LocallyExtracted`,
//! dispatching every non-excluded slit to the object finder, the global sky
//! fitter and the local sky extractor in turn. Echelle data may instead be
//! searched across all orders at once after the global sky is subtracted. Collaborators return
//! full-frame images; only the current slit's pixels are copied back, so
//! slits never write into each other's regions.
//!
//! A failure confined to one slit (invalid edges, a sky model that sums to
//! zero, a collaborator error) excludes that slit and processing continues.
//! Calling a stage before its prerequisites ran is an error naming the
//! missing stage.

mod error;
mod state;


use std::collections::BTreeSet;
use std::fmt;

use common::{BitBuffer2, Buffer2};

pub use error::Error;
pub use state::{ExtractionProducts, ReductionStage, ReductionState};

use crate::combine::{ivar_from_variance, CombinedFrame, FrameCombiner, FrameSet};
use crate::config::{CosmicRayConfig, ReductionConfig};
use crate::objects::{slit_range, DetectedObject};
use crate::quality::{
    build_quality_mask, usable_pixels, MaskInputs, QualityFlag, COUNT_LEVEL_FLAGS,
};
use crate::services::{
    CalibrationSet, CosmicRayDetector, CosmicRayRequest, DetectorProperties, FrameProcessor,
    GlobalSkyFitter, GlobalSkyRequest, LocalSkyExtractor, LocalSkyRequest, ObjectFindRequest,
    ObjectFinder, OrderFindRequest, SlitContext, SlitMetadata, Spectrograph,
};
use crate::slits::{EdgeTraces, SlitGeometry, SlitSelection};

/// The collaborators a reduction calls out to.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub spectrograph: &'a dyn Spectrograph,
    pub processor: &'a dyn FrameProcessor,
    pub cosmic_ray: &'a dyn CosmicRayDetector,
    pub object_finder: &'a dyn ObjectFinder,
    pub global_sky: &'a dyn GlobalSkyFitter,
    pub local_sky: &'a dyn LocalSkyExtractor,
}

/// Drives one science reduction.
pub struct Reduction<'a> {
    services: Services<'a>,
    config: ReductionConfig,
    detector: DetectorProperties,
    cosmic_ray_params: CosmicRayConfig,
    caller_excluded: BTreeSet<usize>,
    state: Option<ReductionState>,
}

impl<'a> Reduction<'a> {
    pub fn new(services: Services<'a>, config: ReductionConfig) -> Result<Self, Error> {
        let spectrograph = services.spectrograph;
        let detector = spectrograph
            .detector_properties(config.detector)
            .ok_or_else(|| Error::UnknownDetector {
                spectrograph: spectrograph.name().to_string(),
                detector: config.detector,
            })?;
        let (sigma_clip, obj_limit) =
            spectrograph.cosmic_ray_params(&config.cosmic_ray, config.binning);
        let cosmic_ray_params = CosmicRayConfig {
            sigma_clip,
            obj_limit,
            ..config.cosmic_ray
        };

        Ok(Self {
            services,
            config,
            detector,
            cosmic_ray_params,
            caller_excluded: BTreeSet::new(),
            state: None,
        })
    }

    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    pub fn detector(&self) -> &DetectorProperties {
        &self.detector
    }

    /// `None` until a combined frame is loaded.
    pub fn state(&self) -> Option<&ReductionState> {
        self.state.as_ref()
    }

    pub fn into_state(self) -> Option<ReductionState> {
        self.state
    }

    // ========================================================================
    // Combined
    // ========================================================================

    /// Read, calibrate and stack `frames`, replacing any previous state.
    pub fn combine(
        &mut self,
        frames: &FrameSet,
        calibrations: &CalibrationSet,
    ) -> Result<(), Error> {
        let combiner = FrameCombiner::new(
            self.services.processor,
            self.services.cosmic_ray,
            self.detector,
            self.cosmic_ray_params,
        )
        .with_process_flags(self.config.process)
        .with_combine_config(self.config.combine.clone());

        let frame = combiner.combine(frames, calibrations)?;
        self.load_combined(frame)
    }

    /// Start from an already combined frame, replacing any previous state.
    pub fn load_combined(&mut self, frame: CombinedFrame) -> Result<(), Error> {
        let expected = frame.image.shape();
        check_shape("Inverse variance", expected, frame.ivar.shape())?;
        check_shape("Read noise", expected, frame.read_noise2.shape())?;
        check_shape("Composite mask", expected, frame.mask.shape())?;
        check_shape("Cosmic-ray mask", expected, bit_shape(&frame.cr_mask))?;
        check_shape("Bad pixel mask", expected, bit_shape(&frame.bpm))?;

        tracing::info!(
            frames = frame.num_frames(),
            width = expected.0,
            height = expected.1,
            difference = frame.is_difference(),
            "Combined frame loaded"
        );
        self.state = Some(ReductionState::new(frame));
        Ok(())
    }

    // ========================================================================
    // Slit selection
    // ========================================================================

    /// Exclude slits from every following stage.
    pub fn exclude_slits(&mut self, slits: impl IntoIterator<Item = usize>) {
        for slit in slits {
            self.caller_excluded.insert(slit);
            if let Some(state) = self.state.as_mut() {
                if slit < state.selection.len() {
                    state.selection.exclude(slit);
                }
            }
        }
    }

    /// Slit geometry for `edges`, rasterised by the spectrograph at the
    /// configured binning on the combined frame's shape.
    pub fn geometry_from_edges(&self, edges: EdgeTraces) -> Result<SlitGeometry, Error> {
        let Some(state) = self.state.as_ref() else {
            return Err(Error::MissingPrerequisite {
                operation: "geometry_from_edges",
                required: ReductionStage::Combined,
            });
        };
        let (width, height) = state.frame.image.shape();
        let map = self
            .services
            .spectrograph
            .slitmask(&edges, self.config.binning, width, height);
        Ok(SlitGeometry::new(edges, map)?)
    }

    /// Attach slit geometry. Re-attaching identical geometry keeps the
    /// current slit selection; new geometry starts a fresh one and rebuilds
    /// the composite mask with the off-slit flag.
    pub fn set_geometry(&mut self, geometry: &SlitGeometry) -> Result<(), Error> {
        let detector = self.detector;
        let state = require(&mut self.state, "set_geometry", ReductionStage::Combined)?;
        if state.geometry.as_ref() == Some(geometry) {
            return Ok(());
        }
        let map = geometry.slit_map();
        check_shape("Slit map", state.frame.image.shape(), (map.width(), map.height()))?;

        let mut selection = SlitSelection::all_good(geometry.num_slits());
        for slit in 0..geometry.num_slits() {
            if !geometry.edges().is_valid(slit) {
                tracing::warn!(slit, "Invalid slit edges, excluding slit");
                selection.exclude(slit);
            }
        }
        for &slit in self.caller_excluded.range(..geometry.num_slits()) {
            selection.exclude(slit);
        }

        state.geometry = Some(geometry.clone());
        state.selection = selection;
        rebuild_mask(state, &detector);

        tracing::info!(
            slits = geometry.num_slits(),
            good = state.selection.num_good(),
            "Slit geometry attached"
        );
        Ok(())
    }

    // ========================================================================
    // ObjectsFound
    // ========================================================================

    /// Find objects on every good slit.
    ///
    /// With `sky_subtract_first` the search runs on the globally
    /// sky-subtracted image and off-slit pixels are not excluded.
    pub fn find_objects(
        &mut self,
        geometry: &SlitGeometry,
        sky_subtract_first: bool,
    ) -> Result<&[DetectedObject], Error> {
        const OP: &str = "find_objects";
        require(&mut self.state, OP, ReductionStage::Combined)?;
        if sky_subtract_first
            && self.state.as_ref().is_some_and(|s| s.global_sky.is_none())
        {
            return Err(Error::MissingPrerequisite {
                operation: OP,
                required: ReductionStage::GlobalSkySubtracted,
            });
        }
        self.set_geometry(geometry)?;

        let services = self.services;
        let find = &self.config.find;
        let hand_extraction = self.config.hand_extraction_for_detector();
        let (detector_index, binning) = (self.config.detector, self.config.binning);
        let state = require(&mut self.state, OP, ReductionStage::Combined)?;

        let image = match (&state.global_sky, sky_subtract_first) {
            (Some(sky), true) => state.frame.image.zip_map(sky, |i, s| i - s),
            _ => state.frame.image.clone(),
        };
        let relaxed: &[QualityFlag] = if sky_subtract_first {
            &[QualityFlag::OffSlits]
        } else {
            &[]
        };
        let usable = usable_pixels(&state.frame.mask, relaxed);

        let (width, height) = image.shape();
        let mut sky_mask = BitBuffer2::new_default(width, height);
        let mut object_mask = BitBuffer2::new_default(width, height);
        let mut objects: Vec<DetectedObject> = Vec::new();
        let num_slits = geometry.num_slits();

        tracing::info!(slits = state.selection.num_good(), sky_subtract_first, "Finding objects");

        for slit in state.selection.good_slits() {
            let this_slit = geometry.slit_map().slit_pixels(slit);
            let inclusion = slit_inclusion(&usable, &state.frame.cr_mask, &this_slit, None);
            let request = ObjectFindRequest {
                image: &image,
                ivar: &state.frame.ivar,
                input_mask: &state.frame.mask,
                slit: SlitContext {
                    metadata: SlitMetadata {
                        slit,
                        num_slits,
                        detector: detector_index,
                        binning,
                    },
                    left: geometry.edges().left(slit),
                    right: geometry.edges().right(slit),
                    inclusion: &inclusion,
                },
                hand_extraction: &hand_extraction,
                max_objects: find.max_objects_per_slit,
                sky_subtracted: sky_subtract_first,
            };

            let result = match services.object_finder.find(&request) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(slit, error = %err, "Object finding failed, excluding slit");
                    state.selection.exclude(slit);
                    continue;
                }
            };
            if !bits_match(&result.sky_mask, width, height)
                || !bits_match(&result.object_mask, width, height)
            {
                tracing::warn!(slit, "Object finder returned masks of the wrong shape, excluding slit");
                state.selection.exclude(slit);
                continue;
            }

            sky_mask.copy_where(&result.sky_mask, &this_slit);
            object_mask.copy_where(&result.object_mask, &this_slit);

            let mut found = result.objects;
            if found.len() > find.max_objects_per_slit {
                tracing::debug!(
                    slit,
                    found = found.len(),
                    kept = find.max_objects_per_slit,
                    "Too many objects, keeping the first ones"
                );
                found.truncate(find.max_objects_per_slit);
            }
            tracing::debug!(slit, objects = found.len(), "Slit searched");
            for mut object in found {
                object.slit = slit;
                objects.push(object);
            }
        }

        tracing::info!(
            objects = objects.len(),
            excluded = num_slits - state.selection.num_good(),
            "Objects found"
        );

        state.objects = objects;
        state.sky_mask = Some(sky_mask);
        state.object_mask = Some(object_mask);
        state.enter(ReductionStage::ObjectsFound);
        Ok(&state.objects)
    }

    // ========================================================================
    // GlobalSkySubtracted
    // ========================================================================

    /// Fit the global sky of every good slit.
    ///
    /// With `use_object_mask` the fit is restricted to the sky pixels from
    /// object finding, when available. A slit whose model sums to zero is
    /// excluded. Cosmic rays are re-detected on the sky-subtracted image
    /// afterwards when configured.
    pub fn global_skysub(
        &mut self,
        geometry: &SlitGeometry,
        tilts: &Buffer2<f32>,
        use_object_mask: bool,
    ) -> Result<&Buffer2<f32>, Error> {
        const OP: &str = "global_skysub";
        require(&mut self.state, OP, ReductionStage::Combined)?;
        self.set_geometry(geometry)?;

        let services = self.services;
        let detector = self.detector;
        let cosmic_ray_params = self.cosmic_ray_params;
        let sky_config = self.config.sky;
        let (detector_index, binning) = (self.config.detector, self.config.binning);
        let state = require(&mut self.state, OP, ReductionStage::Combined)?;
        check_shape("Tilts", state.frame.image.shape(), tilts.shape())?;

        let sky_mask = match (&state.sky_mask, use_object_mask) {
            (Some(mask), true) => Some(mask),
            (None, true) => {
                tracing::warn!("No sky mask from object finding, fitting all slit pixels");
                None
            }
            _ => None,
        };

        let (width, height) = state.frame.image.shape();
        let mut global_sky = Buffer2::new_default(width, height);
        let usable = usable_pixels(&state.frame.mask, &[]);
        let num_slits = geometry.num_slits();

        tracing::info!(slits = state.selection.num_good(), use_object_mask, "Global sky subtraction");

        for slit in state.selection.good_slits() {
            let this_slit = geometry.slit_map().slit_pixels(slit);
            let inclusion = slit_inclusion(&usable, &state.frame.cr_mask, &this_slit, sky_mask);
            let request = GlobalSkyRequest {
                image: &state.frame.image,
                ivar: &state.frame.ivar,
                tilts,
                input_mask: &state.frame.mask,
                slit: SlitContext {
                    metadata: SlitMetadata {
                        slit,
                        num_slits,
                        detector: detector_index,
                        binning,
                    },
                    left: geometry.edges().left(slit),
                    right: geometry.edges().right(slit),
                    inclusion: &inclusion,
                },
                bspline_spacing: sky_config.bspline_spacing,
                enforce_positive: !state.frame.is_difference(),
            };

            let model = match services.global_sky.fit(&request) {
                Ok(model) if model.shape() == (width, height) => model,
                Ok(model) => {
                    tracing::warn!(
                        slit,
                        shape = ?model.shape(),
                        "Global sky model has the wrong shape, excluding slit"
                    );
                    state.selection.exclude(slit);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(slit, error = %err, "Global sky fit failed, excluding slit");
                    state.selection.exclude(slit);
                    continue;
                }
            };

            let total: f64 = model.values_where(&this_slit).map(|&v| v as f64).sum();
            if total == 0.0 {
                tracing::warn!(slit, "Global sky model sums to zero, excluding slit");
                state.selection.exclude(slit);
                continue;
            }
            global_sky.copy_where(&model, &this_slit);
            tracing::debug!(slit, pixels = inclusion.count_ones(), "Global sky fitted");
        }

        if sky_config.update_cr_mask {
            let residual = state.frame.image.zip_map(&global_sky, |i, s| i - s);
            let variance = ivar_from_variance(&state.frame.ivar);
            let cr_mask = services
                .cosmic_ray
                .detect(&CosmicRayRequest {
                    image: &residual,
                    variance: &variance,
                    detector,
                    params: cosmic_ray_params,
                })
                .map_err(|source| Error::CosmicRay { source })?;
            check_shape("Cosmic-ray mask", (width, height), bit_shape(&cr_mask))?;
            tracing::debug!(cosmic_rays = cr_mask.count_ones(), "Cosmic-ray mask refreshed");
            state.frame.cr_mask = cr_mask;
            rebuild_mask(state, &detector);
        }

        tracing::info!(
            good = state.selection.num_good(),
            excluded = num_slits - state.selection.num_good(),
            "Global sky subtracted"
        );

        state.tilts = Some(tilts.clone());
        state.enter(ReductionStage::GlobalSkySubtracted);
        let global_sky: &Buffer2<f32> = state.global_sky.insert(global_sky);
        Ok(global_sky)
    }

    /// Object finding on the raw image followed by a global sky fit
    /// restricted to the sky pixels it found.
    pub fn initial_sky(
        &mut self,
        geometry: &SlitGeometry,
        tilts: &Buffer2<f32>,
    ) -> Result<&Buffer2<f32>, Error> {
        self.find_objects(geometry, false)?;
        self.global_skysub(geometry, tilts, true)
    }

    // ========================================================================
    // OrderObjectsFound
    // ========================================================================

    /// Find objects across every good echelle order in one pass on the
    /// globally sky-subtracted image. `std_trace` guides the search with a
    /// standard star's trace. Objects on excluded orders are dropped and the
    /// rest replace the object list.
    pub fn find_objects_all_orders(
        &mut self,
        std_trace: Option<&[f32]>,
    ) -> Result<&[DetectedObject], Error> {
        const OP: &str = "find_objects_all_orders";
        let services = self.services;
        let hand_extraction = self.config.hand_extraction_for_detector();
        let max_objects = self.config.find.max_objects_per_slit;
        let (detector_index, binning) = (self.config.detector, self.config.binning);
        let state = require(&mut self.state, OP, ReductionStage::GlobalSkySubtracted)?;

        let (Some(geometry), Some(global_sky)) = (&state.geometry, &state.global_sky) else {
            return Err(Error::MissingPrerequisite {
                operation: OP,
                required: ReductionStage::GlobalSkySubtracted,
            });
        };
        let height = state.frame.image.height();
        if let Some(trace) = std_trace {
            if trace.len() != height {
                return Err(Error::StandardTraceLength {
                    rows: trace.len(),
                    expected: height,
                });
            }
        }

        let image = state.frame.image.zip_map(global_sky, |i, s| i - s);
        let mut inclusion = usable_pixels(&state.frame.mask, &[]);
        inclusion.and_not_assign(&state.frame.cr_mask);
        let orders = state.selection.good_slits();
        let num_orders = geometry.num_slits();
        let plate_scale = services.spectrograph.order_platescale(num_orders, binning);

        tracing::info!(
            orders = orders.len(),
            standard = std_trace.is_some(),
            "Finding objects across all orders"
        );

        let found = services
            .object_finder
            .find_all_orders(&OrderFindRequest {
                image: &image,
                ivar: &state.frame.ivar,
                input_mask: &state.frame.mask,
                slit_map: geometry.slit_map(),
                edges: geometry.edges(),
                inclusion: &inclusion,
                orders: &orders,
                plate_scale: &plate_scale,
                std_trace,
                detector: detector_index,
                binning,
                hand_extraction: &hand_extraction,
                max_objects,
            })
            .map_err(|source| Error::OrderObjectFinding { source })?;

        let mut objects: Vec<DetectedObject> = found
            .into_iter()
            .filter(|object| {
                let keep = orders.binary_search(&object.slit).is_ok();
                if !keep {
                    tracing::warn!(order = object.slit, "Object on an excluded order, dropping it");
                }
                keep
            })
            .collect();
        objects.sort_by_key(|o| o.slit);

        tracing::info!(objects = objects.len(), "Objects found across all orders");

        state.objects = objects;
        state.enter(ReductionStage::OrderObjectsFound);
        Ok(&state.objects)
    }

    // ========================================================================
    // LocallyExtracted
    // ========================================================================

    /// Local sky subtraction and extraction of every good slit holding objects.
    ///
    /// `objects` replaces the found object list when given. `standard_star`
    /// tells the extractor the target is a standard star. Slits that are
    /// excluded or hold no objects keep the global sky model and the input
    /// inverse variance. Pixels the extractor rejected inside a processed
    /// slit gain the extraction flag unless a defect flag already explains
    /// them; saturation and minimum-counts bits are kept alongside it.
    pub fn local_skysub_extract(
        &mut self,
        objects: Option<Vec<DetectedObject>>,
        wave_image: &Buffer2<f32>,
        standard_star: bool,
    ) -> Result<&[DetectedObject], Error> {
        const OP: &str = "local_skysub_extract";
        let services = self.services;
        let bspline_spacing = self.config.sky.bspline_spacing;
        let (detector_index, binning) = (self.config.detector, self.config.binning);
        let state = require(&mut self.state, OP, ReductionStage::GlobalSkySubtracted)?;

        let (Some(geometry), Some(tilts), Some(global_sky)) =
            (&state.geometry, &state.tilts, &state.global_sky)
        else {
            return Err(Error::MissingPrerequisite {
                operation: OP,
                required: ReductionStage::GlobalSkySubtracted,
            });
        };
        let (width, height) = state.frame.image.shape();
        check_shape("Wavelength image", (width, height), wave_image.shape())?;

        let mut objects = objects.unwrap_or_else(|| state.objects.clone());
        objects.sort_by_key(|o| o.slit);

        let mut sky_model = global_sky.clone();
        let mut object_model = Buffer2::new_default(width, height);
        let mut ivar_model = state.frame.ivar.clone();
        let usable = usable_pixels(&state.frame.mask, &[]);
        let mut extraction_mask = usable.clone();
        let mut processed = BitBuffer2::new_default(width, height);
        let num_slits = geometry.num_slits();

        tracing::info!(
            slits = state.selection.num_good(),
            objects = objects.len(),
            standard_star,
            "Local sky subtraction and extraction"
        );

        for slit in state.selection.good_slits() {
            let range = slit_range(&objects, slit);
            if range.is_empty() {
                tracing::debug!(slit, "No objects on slit, keeping global sky");
                continue;
            }
            let this_slit = geometry.slit_map().slit_pixels(slit);
            let inclusion = slit_inclusion(&usable, &state.frame.cr_mask, &this_slit, None);
            let request = LocalSkyRequest {
                image: &state.frame.image,
                ivar: &state.frame.ivar,
                tilts,
                wave_image,
                global_sky,
                read_noise2: &state.frame.read_noise2,
                input_mask: &state.frame.mask,
                slit: SlitContext {
                    metadata: SlitMetadata {
                        slit,
                        num_slits,
                        detector: detector_index,
                        binning,
                    },
                    left: geometry.edges().left(slit),
                    right: geometry.edges().right(slit),
                    inclusion: &inclusion,
                },
                bspline_spacing,
                standard_star,
            };

            let slit_objects = &mut objects[range];
            let result = match services.local_sky.extract(&request, slit_objects) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(slit, error = %err, "Local sky extraction failed, excluding slit");
                    state.selection.exclude(slit);
                    continue;
                }
            };
            let shapes_ok = result.sky_model.shape() == (width, height)
                && result.object_model.shape() == (width, height)
                && result.ivar_model.shape() == (width, height)
                && bits_match(&result.extraction_mask, width, height);
            if !shapes_ok {
                tracing::warn!(slit, "Local sky models have the wrong shape, excluding slit");
                state.selection.exclude(slit);
                continue;
            }

            sky_model.copy_where(&result.sky_model, &this_slit);
            object_model.copy_where(&result.object_model, &this_slit);
            ivar_model.copy_where(&result.ivar_model, &this_slit);
            extraction_mask.copy_where(&result.extraction_mask, &this_slit);
            processed.or_assign(&this_slit);
            tracing::debug!(slit, objects = slit_objects.len(), "Slit extracted");
        }

        let mut rejected = processed;
        rejected.and_not_assign(&extraction_mask);
        let mut output_mask = state.frame.mask.clone();
        let mut flagged = 0;
        for idx in rejected.iter_ones() {
            if output_mask[idx] & !COUNT_LEVEL_FLAGS == 0 {
                output_mask[idx] |= QualityFlag::Extract.bit();
                flagged += 1;
            }
        }

        tracing::info!(
            extracted = objects.iter().filter(|o| o.is_extracted()).count(),
            rejected = rejected.count_ones(),
            flagged,
            "Local sky subtraction and extraction done"
        );

        state.objects = objects;
        state.extraction = Some(ExtractionProducts {
            sky_model,
            object_model,
            ivar_model,
            extraction_mask,
            output_mask,
        });
        state.enter(ReductionStage::LocallyExtracted);
        Ok(&state.objects)
    }

}

impl fmt::Display for Reduction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (nimg, steps) = match &self.state {
            Some(state) => (state.num_frames(), state.steps()),
            None => (0, &[][..]),
        };
        write!(f, "<Reduction: nimg={nimg} steps: [")?;
        for (i, step) in steps.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{step}")?;
        }
        f.write_str("]>")
    }
}

/// State, provided `required` has completed.
fn require<'s>(
    state: &'s mut Option<ReductionState>,
    operation: &'static str,
    required: ReductionStage,
) -> Result<&'s mut ReductionState, Error> {
    match state.as_mut() {
        Some(state) if state.stage >= required => Ok(state),
        _ => Err(Error::MissingPrerequisite {
            operation,
            required,
        }),
    }
}

/// Usable pixels of one slit: composite mask clear (after relaxation), no
/// cosmic ray, inside the slit and, if given, inside `restrict`.
fn slit_inclusion(
    usable: &BitBuffer2,
    cr_mask: &BitBuffer2,
    this_slit: &BitBuffer2,
    restrict: Option<&BitBuffer2>,
) -> BitBuffer2 {
    let mut inclusion = this_slit.clone();
    inclusion.and_assign(usable);
    inclusion.and_not_assign(cr_mask);
    if let Some(restrict) = restrict {
        inclusion.and_assign(restrict);
    }
    inclusion
}

/// Rebuild the composite mask from the frame's products and the attached slit map.
fn rebuild_mask(state: &mut ReductionState, detector: &DetectorProperties) {
    let frame = &state.frame;
    let mask = build_quality_mask(
        &MaskInputs {
            image: &frame.image,
            ivar: &frame.ivar,
            cr_mask: &frame.cr_mask,
            bpm: &frame.bpm,
            slit_map: state.geometry.as_ref().map(|g| g.slit_map()),
        },
        detector,
        !frame.is_difference(),
    );
    state.frame.mask = mask;
}

fn check_shape(
    what: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<(), Error> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            what,
            expected,
            actual,
        })
    }
}

#[inline]
fn bit_shape(bits: &BitBuffer2) -> (usize, usize) {
    (bits.width(), bits.height())
}

#[inline]
fn bits_match(bits: &BitBuffer2, width: usize, height: usize) -> bool {
    bit_shape(bits) == (width, height)
}
