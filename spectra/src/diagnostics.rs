//! Diagnostic images derived from a reduction state.

use common::{BitBuffer2, Buffer2};

use crate::quality::{usable_pixels, CompositeMask};
use crate::reduction::ReductionState;

/// Images a reduction can be inspected through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosticView {
    /// Combined image with cosmic-ray pixels zeroed.
    Image,
    GlobalSkySubtracted,
    LocalSkySubtracted,
    /// Local sky residual in units of the model noise.
    SkyResidual,
    /// Residual after sky and object models, in units of the model noise.
    Residual,
}

impl DiagnosticView {
    /// Render the view, or `None` when the stage producing it has not run.
    /// Masked pixels are zero in every view except [`DiagnosticView::Image`].
    pub fn render(self, state: &ReductionState) -> Option<Buffer2<f32>> {
        let image = state.image();
        match self {
            Self::Image => {
                let cr = state.cr_mask();
                Some(Buffer2::from_fn(image.width(), image.height(), |x, y| {
                    if cr.get_xy(x, y) {
                        0.0
                    } else {
                        image[(x, y)]
                    }
                }))
            }
            Self::GlobalSkySubtracted => {
                let sky = state.global_sky()?;
                let keep = usable_pixels(state.mask(), &[]);
                Some(masked(image, &keep, |i| image[i] - sky[i]))
            }
            Self::LocalSkySubtracted => {
                let ext = state.extraction()?;
                let keep = clear(&ext.output_mask);
                Some(masked(image, &keep, |i| image[i] - ext.sky_model[i]))
            }
            Self::SkyResidual => {
                let ext = state.extraction()?;
                let keep = clear(&ext.output_mask);
                Some(masked(image, &keep, |i| {
                    (image[i] - ext.sky_model[i]) * ext.ivar_model[i].max(0.0).sqrt()
                }))
            }
            Self::Residual => {
                let ext = state.extraction()?;
                let keep = clear(&ext.output_mask);
                Some(masked(image, &keep, |i| {
                    (image[i] - ext.sky_model[i] - ext.object_model[i])
                        * ext.ivar_model[i].max(0.0).sqrt()
                }))
            }
        }
    }
}

fn clear(mask: &CompositeMask) -> BitBuffer2 {
    usable_pixels(mask, &[])
}

fn masked(like: &Buffer2<f32>, keep: &BitBuffer2, f: impl Fn(usize) -> f32) -> Buffer2<f32> {
    let width = like.width();
    Buffer2::from_fn(width, like.height(), |x, y| {
        let idx = y * width + x;
        if keep.get(idx) {
            f(idx)
        } else {
            0.0
        }
    })
}
