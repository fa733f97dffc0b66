//! Spectra - science-frame reduction core for multi-slit spectroscopy.
//!
//! This library turns raw science exposures into sky-subtracted, extracted
//! spectra:
//! - Frame stacking with inverse-variance propagation and difference imaging
//! - Per-pixel quality masks built from named bit flags
//! - Slit-by-slit object finding, global and local sky subtraction
//! - L.A.Cosmic cosmic-ray detection
//!
//! The numerical kernels for sky fitting, object finding and extraction are
//! supplied by the caller through the traits in [`services`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spectra::{FrameSet, Reduction, ReductionConfig, Services};
//!
//! let mut reduction = Reduction::new(services, ReductionConfig::from_file("reduce.yaml")?)?;
//! reduction.combine(&FrameSet::science(&["d0123.fits", "d0124.fits"]), &calibrations)?;
//! let geometry = reduction.geometry_from_edges(edges)?;
//! reduction.initial_sky(&geometry, &tilts)?;
//! reduction.find_objects(&geometry, true)?;
//! reduction.global_skysub(&geometry, &tilts, true)?;
//! let objects = reduction.local_skysub_extract(None, &wave_image, false)?;
//! ```

pub mod bitmask;
pub mod combine;
pub mod config;
pub mod cosmic_ray;
pub mod diagnostics;
pub mod objects;
pub mod quality;
pub mod reduction;
pub mod services;
pub mod slits;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Masks
// ============================================================================

pub use bitmask::BitMask;
pub use quality::{
    build_quality_mask, CompositeMask, MaskInputs, MaskValue, QualityFlag, COUNT_LEVEL_FLAGS,
};

// ============================================================================
// Combination
// ============================================================================

pub use combine::{CombinedFrame, FrameCombiner, FrameRole, FrameSet};

// ============================================================================
// Reduction
// ============================================================================

pub use config::{CombineConfig, CosmicRayConfig, FindConfig, ReductionConfig, SkyConfig};
pub use diagnostics::DiagnosticView;
pub use objects::{DetectedObject, ExtractedSpectrum, HandExtraction};
pub use reduction::{ExtractionProducts, Reduction, ReductionStage, ReductionState, Services};
pub use slits::{EdgeTraces, SlitGeometry, SlitMap, SlitSelection};

// ============================================================================
// Collaborators
// ============================================================================

pub use cosmic_ray::LaCosmicDetector;
pub use services::{
    Binning, CalibrationSet, DetectorProperties, GenericSpectrograph, ProcessFlags,
    ProcessedFrame, ServiceError, ServiceResult, Spectrograph,
};
