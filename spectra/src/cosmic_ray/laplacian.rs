//! Laplacian edge response.
//!
//! Cosmic rays have sharper edges than anything the optics can deliver, so
//! the discrete Laplacian responds far more strongly to them than to real
//! sources. Only the peak side of the response is kept.

use rayon::prelude::*;

use common::Buffer2;

/// Negated 3x3 Laplacian `4c - (l + r + u + d)`, clamped at zero.
///
/// Edge pixels reuse the centre value for missing neighbours.
pub fn laplacian_peaks(pixels: &Buffer2<f32>) -> Buffer2<f32> {
    let width = pixels.width();
    let height = pixels.height();
    let mut out = Buffer2::new_default(width, height);
    if width == 0 {
        return out;
    }

    out.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, value) in row.iter_mut().enumerate() {
                let c = *pixels.get(x, y);
                let left = if x > 0 { *pixels.get(x - 1, y) } else { c };
                let right = if x + 1 < width { *pixels.get(x + 1, y) } else { c };
                let up = if y > 0 { *pixels.get(x, y - 1) } else { c };
                let down = if y + 1 < height { *pixels.get(x, y + 1) } else { c };
                *value = (4.0 * c - left - right - up - down).max(0.0);
            }
        });

    out
}
