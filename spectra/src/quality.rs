//! Per-pixel quality flags and the composite mask builder.
//!
//! Every science pixel carries a [`MaskValue`] holding the OR of the
//! [`QualityFlag`]s that apply to it. A value of zero means the pixel is
//! usable.

use std::sync::OnceLock;

use rayon::prelude::*;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{EnumCount as EnumCountMacro, EnumIter};

use common::{BitBuffer2, Buffer2};

use crate::bitmask::BitMask;
use crate::services::DetectorProperties;
use crate::slits::SlitMap;

/// Storage word of the composite mask.
pub type MaskValue = u16;

/// Composite quality mask, one [`MaskValue`] per pixel.
pub type CompositeMask = Buffer2<MaskValue>;

/// Reasons a science pixel can be excluded. Bit `i` is the i-th variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCountMacro)]
#[repr(u8)]
pub enum QualityFlag {
    BadPixel,
    CosmicRay,
    Saturation,
    MinCounts,
    OffSlits,
    IsNan,
    Ivar0,
    IvarNan,
    Extract,
}

const _: () = assert!(QualityFlag::COUNT <= MaskValue::BITS as usize);

/// Flags describing a pixel's counts rather than a defect.
pub const COUNT_LEVEL_FLAGS: MaskValue =
    QualityFlag::Saturation.bit() | QualityFlag::MinCounts.bit();

impl QualityFlag {
    /// Registry name of the flag.
    pub const fn name(self) -> &'static str {
        match self {
            Self::BadPixel => "BPM",
            Self::CosmicRay => "CR",
            Self::Saturation => "SATURATION",
            Self::MinCounts => "MINCOUNTS",
            Self::OffSlits => "OFFSLITS",
            Self::IsNan => "IS_NAN",
            Self::Ivar0 => "IVAR0",
            Self::IvarNan => "IVAR_NAN",
            Self::Extract => "EXTRACT",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::BadPixel => "Component of the instrument-specific bad pixel mask",
            Self::CosmicRay => "Cosmic ray detected",
            Self::Saturation => "Saturated pixel",
            Self::MinCounts => "Pixel below the instrument-specific minimum counts",
            Self::OffSlits => "Pixel does not belong to any slit",
            Self::IsNan => "Pixel value is undefined",
            Self::Ivar0 => "Inverse variance is undefined",
            Self::IvarNan => "Inverse variance is NaN",
            Self::Extract => "Pixel masked during local skysub and extraction",
        }
    }

    #[inline]
    pub const fn bit(self) -> MaskValue {
        1 << self as u8
    }

    #[inline]
    pub const fn is_set(self, value: MaskValue) -> bool {
        value & self.bit() != 0
    }

    /// OR of several flags.
    pub fn combine(flags: &[QualityFlag]) -> MaskValue {
        flags.iter().fold(0, |acc, f| acc | f.bit())
    }

    /// All flags set in `value`, in bit order.
    pub fn decode(value: MaskValue) -> Vec<QualityFlag> {
        Self::iter().filter(|f| f.is_set(value)).collect()
    }

    /// The registry as a symbolic [`BitMask`], bit-compatible with [`QualityFlag::bit`].
    pub fn bitmask() -> &'static BitMask {
        static REGISTRY: OnceLock<BitMask> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            BitMask::new(Self::iter().map(|f| (f.name(), f.description())))
                .expect("quality flag names are unique and fit the mask word")
        })
    }
}

impl std::fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to [`build_quality_mask`]. All images share one shape.
#[derive(Debug, Clone, Copy)]
pub struct MaskInputs<'a> {
    pub image: &'a Buffer2<f32>,
    pub ivar: &'a Buffer2<f32>,
    pub cr_mask: &'a BitBuffer2,
    pub bpm: &'a BitBuffer2,
    pub slit_map: Option<&'a SlitMap>,
}

/// Build the composite mask for a science image.
///
/// Pure function of its inputs: the same inputs always give the same mask.
/// The minimum-counts check is skipped when `check_min_counts` is false,
/// which is how difference-imaging results are treated since their pixels
/// can be legitimately negative.
pub fn build_quality_mask(
    inputs: &MaskInputs<'_>,
    detector: &DetectorProperties,
    check_min_counts: bool,
) -> CompositeMask {
    let MaskInputs {
        image,
        ivar,
        cr_mask,
        bpm,
        slit_map,
    } = *inputs;

    assert!(image.same_shape(ivar), "image/ivar shape mismatch");
    assert!(image.same_shape_as_bits(cr_mask), "cosmic-ray mask shape mismatch");
    assert!(image.same_shape_as_bits(bpm), "bad pixel mask shape mismatch");
    if let Some(map) = slit_map {
        assert!(image.same_shape(map.buffer()), "slit map shape mismatch");
    }

    let width = image.width();
    let mut mask = CompositeMask::new_default(width, image.height());

    mask.pixels_mut()
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let idx = y * width + x;
                let pixel = image[idx];
                let inv = ivar[idx];
                let mut bits: MaskValue = 0;

                if bpm.get(idx) {
                    bits |= QualityFlag::BadPixel.bit();
                }
                if cr_mask.get(idx) {
                    bits |= QualityFlag::CosmicRay.bit();
                }
                if pixel >= detector.saturation {
                    bits |= QualityFlag::Saturation.bit();
                }
                if check_min_counts && pixel <= detector.min_counts {
                    bits |= QualityFlag::MinCounts.bit();
                }
                if slit_map.is_some_and(|m| m.slit_at(x, y).is_none()) {
                    bits |= QualityFlag::OffSlits.bit();
                }
                if !pixel.is_finite() {
                    bits |= QualityFlag::IsNan.bit();
                }
                if !(inv > 0.0) {
                    bits |= QualityFlag::Ivar0.bit();
                }
                if !inv.is_finite() {
                    bits |= QualityFlag::IvarNan.bit();
                }

                *value = bits;
            }
        });

    mask
}

/// Pixels whose mask is clear once the `relaxed` flags are ignored.
pub fn usable_pixels(mask: &CompositeMask, relaxed: &[QualityFlag]) -> BitBuffer2 {
    let blocking = !QualityFlag::combine(relaxed);
    BitBuffer2::from_fn(mask.width(), mask.height(), |i| mask[i] & blocking == 0)
}

/// Count of pixels carrying each flag, in bit order. Zero counts are kept.
pub fn flag_counts(mask: &CompositeMask) -> Vec<(QualityFlag, usize)> {
    QualityFlag::iter()
        .map(|flag| (flag, mask.iter().filter(|&&v| flag.is_set(v)).count()))
        .collect()
}
