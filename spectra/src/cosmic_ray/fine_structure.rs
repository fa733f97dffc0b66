//! Median filters and the fine-structure image.
//!
//! Fine structure is what a small median filter keeps but a larger one
//! removes. Compact real sources have a lot of it; cosmic rays on flat sky
//! have almost none, which is how the two are told apart.

use rayon::prelude::*;

use common::{BitBuffer2, Buffer2};

/// Upper median of a small buffer, reordering it in place.
#[inline]
pub fn median_of_n(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, median, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    *median
}

/// Square median filter of half-width `radius`, truncated at the borders.
pub fn median_filter(pixels: &Buffer2<f32>, radius: usize) -> Buffer2<f32> {
    median_filter_excluding(pixels, radius, None)
}

/// Median filter ignoring pixels set in `excluded`. Falls back to the full
/// window when every neighbour is excluded.
pub fn median_filter_excluding(
    pixels: &Buffer2<f32>,
    radius: usize,
    excluded: Option<&BitBuffer2>,
) -> Buffer2<f32> {
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
            let side = 2 * radius + 1;
            let mut window = Vec::with_capacity(side * side);
            let y0 = y.saturating_sub(radius);
            let y1 = (y + radius + 1).min(height);
            for (x, value) in row.iter_mut().enumerate() {
                let x0 = x.saturating_sub(radius);
                let x1 = (x + radius + 1).min(width);

                window.clear();
                for ny in y0..y1 {
                    for nx in x0..x1 {
                        let idx = ny * width + nx;
                        if excluded.is_some_and(|m| m.get(idx)) {
                            continue;
                        }
                        window.push(pixels[idx]);
                    }
                }
                if window.is_empty() {
                    for ny in y0..y1 {
                        window.extend_from_slice(&pixels.row(ny)[x0..x1]);
                    }
                }
                *value = median_of_n(&mut window);
            }
        });

    out
}

/// `med3(I) - med7(med3(I))`.
pub fn fine_structure(pixels: &Buffer2<f32>) -> Buffer2<f32> {
    let med3 = median_filter(pixels, 1);
    let med7 = median_filter(&med3, 3);
    med3.zip_map(&med7, |a, b| a - b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_of_n() {
        let mut odd = [1.0, 5.0, 3.0, 2.0, 4.0];
        assert_eq!(median_of_n(&mut odd), 3.0);

        let mut even = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(median_of_n(&mut even), 3.0);

        let mut single = [42.0];
        assert_eq!(median_of_n(&mut single), 42.0);

        assert_eq!(median_of_n(&mut []), 0.0);
    }

    #[test]
    fn test_median_filter_removes_single_spike() {
        let mut pixels = Buffer2::new_filled(5, 5, 1.0f32);
        pixels[(2, 2)] = 100.0;
        let filtered = median_filter(&pixels, 1);
        assert!(filtered.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_median_filter_excluding_skips_masked() {
        let pixels = Buffer2::new(3, 1, vec![1.0f32, 50.0, 60.0]);
        let excluded = BitBuffer2::from_slice(3, 1, &[false, true, true]);
        let filtered = median_filter_excluding(&pixels, 1, Some(&excluded));
        // only the unmasked pixel is left in every window
        assert_eq!(filtered.pixels(), &[1.0, 1.0, 60.0]);
    }

    #[test]
    fn test_fine_structure_flat_and_peak() {
        let flat = Buffer2::new_filled(9, 9, 0.5f32);
        assert!(fine_structure(&flat).iter().all(|&v| v.abs() < 1e-6));

        // a 3x3 block survives med3 but not med7
        let mut block = Buffer2::new_filled(11, 11, 0.0f32);
        for y in 4..7 {
            for x in 4..7 {
                block[(x, y)] = 1.0;
            }
        }
        assert!(fine_structure(&block)[(5, 5)] > 0.5);
    }
}
