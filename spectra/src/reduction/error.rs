//! Error types for the reduction driver.

use thiserror::Error;

use crate::reduction::ReductionStage;
use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("'{operation}' requires the {required} stage to run first")]
    MissingPrerequisite {
        operation: &'static str,
        required: ReductionStage,
    },

    #[error("Spectrograph '{spectrograph}' has no detector {detector}")]
    UnknownDetector {
        spectrograph: String,
        detector: usize,
    },

    #[error("{what} is {actual:?} but the science image is {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Standard-star trace has {rows} rows but the science image has {expected}")]
    StandardTraceLength { rows: usize, expected: usize },

    #[error("Object finding across all orders failed: {source}")]
    OrderObjectFinding {
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Combine(#[from] crate::combine::Error),

    #[error(transparent)]
    Slits(#[from] crate::slits::Error),

    #[error("Cosmic-ray refresh failed: {source}")]
    CosmicRay {
        #[source]
        source: ServiceError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_prerequisite_names_stage() {
        let err = Error::MissingPrerequisite {
            operation: "local_skysub_extract",
            required: ReductionStage::GlobalSkySubtracted,
        };
        assert_eq!(
            err.to_string(),
            "'local_skysub_extract' requires the global_sky_subtracted stage to run first"
        );
    }

    #[test]
    fn test_wrapped_errors_are_transparent() {
        let err = Error::from(crate::combine::Error::NoScienceFrames);
        assert_eq!(err.to_string(), "No science frames provided");
    }
}
