//! Detected sources and their extracted spectra.

use serde::{Deserialize, Serialize};

/// A user-requested extraction at a fixed position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HandExtraction {
    /// 1-based detector index the position refers to.
    pub detector: usize,
    /// Spectral pixel of the requested position.
    pub spectral: f32,
    /// Spatial pixel of the requested position.
    pub spatial: f32,
    /// Profile FWHM in pixels.
    pub fwhm: f32,
}

/// Optimal or boxcar extraction of one object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedSpectrum {
    pub flux: Vec<f32>,
    pub ivar: Vec<f32>,
    pub wave: Vec<f32>,
}

impl ExtractedSpectrum {
    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }
}

/// A source found on one slit.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub slit: usize,
    pub object_id: usize,
    /// Spatial centroid for every spectral row.
    pub trace_spat: Vec<f32>,
    pub hand_extract: bool,
    /// Filled in by local sky subtraction and extraction.
    pub spectrum: Option<ExtractedSpectrum>,
}

impl DetectedObject {
    pub fn new(slit: usize, object_id: usize, trace_spat: Vec<f32>) -> Self {
        Self {
            slit,
            object_id,
            trace_spat,
            hand_extract: false,
            spectrum: None,
        }
    }

    pub fn is_extracted(&self) -> bool {
        self.spectrum.is_some()
    }

    /// Mean spatial position along the trace.
    pub fn mean_spatial(&self) -> Option<f32> {
        if self.trace_spat.is_empty() {
            return None;
        }
        Some(self.trace_spat.iter().sum::<f32>() / self.trace_spat.len() as f32)
    }
}

/// Range of `objects` belonging to `slit`, which must be grouped by slit.
pub(crate) fn slit_range(objects: &[DetectedObject], slit: usize) -> std::ops::Range<usize> {
    let start = objects.partition_point(|o| o.slit < slit);
    let end = objects.partition_point(|o| o.slit <= slit);
    start..end
}
