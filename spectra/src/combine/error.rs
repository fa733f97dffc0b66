//! Error types for frame combination.

use std::path::PathBuf;

use thiserror::Error;

use crate::combine::FrameRole;
use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No science frames provided")]
    NoScienceFrames,

    #[error("Sigma clipping cannot be combined with difference imaging")]
    SigmaClipWithDifferenceImaging,

    #[error("Sigma clipping threshold must be positive, got {sigma}")]
    InvalidSigma { sigma: f32 },

    #[error("A bad pixel mask is required to combine frames")]
    MissingBadPixelMask,

    #[error("Bad pixel mask is {actual:?} but frames are {expected:?}")]
    BadPixelMaskShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Failed to process {role} frame '{path}': {source}")]
    FrameProcessing {
        role: FrameRole,
        path: PathBuf,
        #[source]
        source: ServiceError,
    },

    #[error(
        "Dimension mismatch for {role} frame {index}: expected {expected:?}, got {actual:?}"
    )]
    DimensionMismatch {
        role: FrameRole,
        index: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Cosmic-ray detection failed: {source}")]
    CosmicRay {
        #[source]
        source: ServiceError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_messages() {
        assert_eq!(Error::NoScienceFrames.to_string(), "No science frames provided");
        assert_eq!(
            Error::SigmaClipWithDifferenceImaging.to_string(),
            "Sigma clipping cannot be combined with difference imaging"
        );
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = Error::DimensionMismatch {
            role: FrameRole::Background,
            index: 1,
            expected: (100, 200),
            actual: (50, 200),
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch for background frame 1: expected (100, 200), got (50, 200)"
        );
    }

    #[test]
    fn test_frame_processing_keeps_source() {
        use std::error::Error as _;
        let err = Error::FrameProcessing {
            role: FrameRole::Science,
            path: PathBuf::from("/data/raw/d0123.fits"),
            source: "file is truncated".into(),
        };
        assert!(err.to_string().contains("science frame '/data/raw/d0123.fits'"));
        assert_eq!(err.source().unwrap().to_string(), "file is truncated");
    }
}
