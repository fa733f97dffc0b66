//! Tests for cosmic-ray detection.

use super::*;

const SIZE: usize = 15;
const CENTER: usize = 7;
const SKY: f32 = 100.0;

fn sky_frame() -> (Buffer2<f32>, Buffer2<f32>) {
    (
        Buffer2::new_filled(SIZE, SIZE, SKY),
        Buffer2::new_filled(SIZE, SIZE, SKY),
    )
}

#[test]
fn test_sharp_hit_is_detected() {
    let (mut image, variance) = sky_frame();
    image[(CENTER, CENTER)] = 5000.0;

    let mask = detect_cosmic_rays(
        &image,
        &variance,
        &DetectorProperties::default(),
        &CosmicRayConfig::default(),
    )
    .unwrap();

    assert!(mask.get_xy(CENTER, CENTER), "Sharp peak should be detected");
    assert_eq!(mask.count_ones(), 1);
}

#[test]
fn test_smooth_source_is_not_detected() {
    let sigma = 2.0f32;
    let image = Buffer2::from_fn(SIZE, SIZE, |x, y| {
        let dx = x as f32 - CENTER as f32;
        let dy = y as f32 - CENTER as f32;
        SKY + 1000.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    });
    let variance = Buffer2::new_filled(SIZE, SIZE, SKY);

    let mask = detect_cosmic_rays(
        &image,
        &variance,
        &DetectorProperties::default(),
        &CosmicRayConfig::default(),
    )
    .unwrap();

    assert!(
        !mask.get_xy(CENTER, CENTER),
        "PSF-smoothed source should not be detected"
    );
}

#[test]
fn test_saturated_pixels_are_never_flagged() {
    let (mut image, variance) = sky_frame();
    image[(CENTER, CENTER)] = 70000.0;

    let mask = detect_cosmic_rays(
        &image,
        &variance,
        &DetectorProperties::default(),
        &CosmicRayConfig::default(),
    )
    .unwrap();

    assert!(!mask.any());
}

#[test]
fn test_growth_adds_significant_neighbours() {
    let (mut image, variance) = sky_frame();
    image[(CENTER, CENTER)] = 5000.0;
    // S = 4 * 12.5 / (2 * 10) = 2.5: below sigma_clip, above sigma_clip * sigma_fraction
    image[(CENTER + 1, CENTER + 1)] = SKY + 12.5;

    let detector = DetectorProperties::default();
    let config = CosmicRayConfig::default();
    let mask = detect_cosmic_rays(&image, &variance, &detector, &config).unwrap();
    assert!(mask.get_xy(CENTER, CENTER));
    assert!(mask.get_xy(CENTER + 1, CENTER + 1));
    assert_eq!(mask.count_ones(), 2);

    let no_grow = CosmicRayConfig {
        grow: 0.0,
        ..config
    };
    let mask = detect_cosmic_rays(&image, &variance, &detector, &no_grow).unwrap();
    assert_eq!(mask.count_ones(), 1);
}

#[test]
fn test_faint_bump_alone_is_not_detected() {
    let (mut image, variance) = sky_frame();
    image[(CENTER, CENTER)] = SKY + 12.5;

    let mask = detect_cosmic_rays(
        &image,
        &variance,
        &DetectorProperties::default(),
        &CosmicRayConfig::default(),
    )
    .unwrap();

    assert!(!mask.any());
}

#[test]
fn test_undefined_variance_falls_back_to_counts() {
    let (mut image, _) = sky_frame();
    image[(CENTER, CENTER)] = 5000.0;
    let variance = Buffer2::new_filled(SIZE, SIZE, 0.0f32);

    let mask = detect_cosmic_rays(
        &image,
        &variance,
        &DetectorProperties::default(),
        &CosmicRayConfig::default(),
    )
    .unwrap();

    assert!(mask.get_xy(CENTER, CENTER));
}

#[test]
fn test_shape_mismatch() {
    let image = Buffer2::new_filled(4, 3, SKY);
    let variance = Buffer2::new_filled(3, 4, SKY);
    let err = detect_cosmic_rays(
        &image,
        &variance,
        &DetectorProperties::default(),
        &CosmicRayConfig::default(),
    )
    .unwrap_err();
    assert_eq!(
        err,
        Error::ShapeMismatch {
            expected: (4, 3),
            actual: (3, 4)
        }
    );
}

#[test]
fn test_detector_trait_wraps_errors() {
    let image = Buffer2::new_filled(4, 3, SKY);
    let variance = Buffer2::new_filled(3, 4, SKY);
    let request = CosmicRayRequest {
        image: &image,
        variance: &variance,
        detector: DetectorProperties::default(),
        params: CosmicRayConfig::default(),
    };
    let err = LaCosmicDetector.detect(&request).unwrap_err();
    assert!(err.to_string().contains("Variance image"));
}
