//! Reduction parameters.
//!
//! Every section has complete defaults, so a configuration file only needs
//! the values it changes:
//!
//! ```yaml
//! combine:
//!   sigma_clip: true
//! cosmic_ray:
//!   sigma_clip: 4.0
//!   obj_limit: 1.5
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::{FileExtensionError, FileFormat, SerdeFormatError};

use crate::objects::HandExtraction;
use crate::services::{Binning, ProcessFlags};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read configuration '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unrecognised configuration file '{path}': {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FileExtensionError,
    },

    #[error("Failed to parse configuration '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: SerdeFormatError,
    },
}

/// Frame stacking options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    /// Iterative sigma clipping across the stack.
    pub sigma_clip: bool,
    /// Clipping threshold; looked up from `sigma_table` when unset.
    pub sigma: Option<f32>,
    pub max_iterations: usize,
    /// Empirical `(frame count, sigma)` pairs.
    pub sigma_table: Vec<(usize, f32)>,
    /// Sigma for stacks smaller than the first table entry.
    pub sigma_default_small: f32,
    /// Sigma for stacks larger than the last table entry.
    pub sigma_default_large: f32,
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            sigma_clip: false,
            sigma: None,
            max_iterations: 5,
            sigma_table: vec![(3, 1.1), (4, 1.3), (5, 1.6), (6, 1.9)],
            sigma_default_small: 100.0,
            sigma_default_large: 2.0,
        }
    }
}

impl CombineConfig {
    /// Clipping threshold for a stack of `n` frames.
    pub fn sigma_for(&self, n: usize) -> f32 {
        if let Some(sigma) = self.sigma {
            return sigma;
        }
        if let Some(&(_, sigma)) = self.sigma_table.iter().find(|(count, _)| *count == n) {
            return sigma;
        }
        let smallest = self.sigma_table.iter().map(|(c, _)| *c).min().unwrap_or(3);
        if n < smallest {
            self.sigma_default_small
        } else {
            self.sigma_default_large
        }
    }
}

/// L.A.Cosmic parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmicRayConfig {
    pub max_iterations: usize,
    /// Growth radius in pixels around each detection.
    pub grow: f32,
    /// Reject compact sources using the fine-structure image.
    pub remove_compact_sources: bool,
    /// Laplacian significance threshold.
    pub sigma_clip: f32,
    /// Fraction of `sigma_clip` required for grown neighbours.
    pub sigma_fraction: f32,
    /// Minimum Laplacian to fine-structure contrast.
    pub obj_limit: f32,
}

impl Default for CosmicRayConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1,
            grow: 1.5,
            remove_compact_sources: true,
            sigma_clip: 4.5,
            sigma_fraction: 0.3,
            obj_limit: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyConfig {
    /// Break-point spacing of the sky b-spline, in pixels.
    pub bspline_spacing: f32,
    /// Redo cosmic-ray detection on the sky-subtracted image.
    pub update_cr_mask: bool,
}

impl Default for SkyConfig {
    fn default() -> Self {
        Self {
            bspline_spacing: 0.6,
            update_cr_mask: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindConfig {
    pub max_objects_per_slit: usize,
    pub hand_extraction: Vec<HandExtraction>,
}

impl Default for FindConfig {
    fn default() -> Self {
        Self {
            max_objects_per_slit: 10,
            hand_extraction: Vec::new(),
        }
    }
}

/// All parameters of a science reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub process: ProcessFlags,
    pub combine: CombineConfig,
    pub cosmic_ray: CosmicRayConfig,
    pub sky: SkyConfig,
    pub find: FindConfig,
    /// 1-based detector index.
    pub detector: usize,
    pub binning: Binning,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            process: ProcessFlags::default(),
            combine: CombineConfig::default(),
            cosmic_ray: CosmicRayConfig::default(),
            sky: SkyConfig::default(),
            find: FindConfig::default(),
            detector: 1,
            binning: Binning::default(),
        }
    }
}

impl ReductionConfig {
    /// Load from a YAML or JSON file, chosen by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let format = FileFormat::from_file_name(&path.to_string_lossy()).map_err(|source| {
            Error::Format {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        common::deserialize(&text, format).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Hand extractions that refer to this configuration's detector.
    pub fn hand_extraction_for_detector(&self) -> Vec<HandExtraction> {
        self.find
            .hand_extraction
            .iter()
            .filter(|h| h.detector == self.detector)
            .copied()
            .collect()
    }
}
