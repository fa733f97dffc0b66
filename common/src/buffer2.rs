//! Dense row-major 2D buffer.
//!
//! Images are stored with `x` along the spatial axis (columns) and `y` along
//! the spectral axis (rows), so one spectral row is one contiguous slice.

use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::slice;

use crate::bit_buffer2::BitBuffer2;

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer2<T> {
    pixels: Vec<T>,
    width: usize,
    height: usize,
}

impl<T> Buffer2<T> {
    pub fn new(width: usize, height: usize, pixels: Vec<T>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "pixels length must equal width * height"
        );
        Self {
            pixels,
            width,
            height,
        }
    }

    /// Build a buffer by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> &T {
        debug_assert!(x < self.width && y < self.height);
        &self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn get_mut(&mut self, x: usize, y: usize) -> &mut T {
        debug_assert!(x < self.width && y < self.height);
        &mut self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[inline]
    pub fn same_shape<U>(&self, other: &Buffer2<U>) -> bool {
        self.width == other.width() && self.height == other.height()
    }

    #[inline]
    pub fn same_shape_as_bits(&self, bits: &BitBuffer2) -> bool {
        self.width == bits.width() && self.height == bits.height()
    }

    #[inline]
    pub fn pixels(&self) -> &[T] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [T] {
        &mut self.pixels
    }

    /// One row of the buffer (a single spectral pixel across all columns).
    #[inline]
    pub fn row(&self, y: usize) -> &[T] {
        let start = y * self.width;
        &self.pixels[start..start + self.width]
    }

    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Buffer2<U> {
        Buffer2 {
            pixels: self.pixels.iter().map(f).collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Combine two equally shaped buffers element by element.
    pub fn zip_map<U, V>(&self, other: &Buffer2<U>, mut f: impl FnMut(&T, &U) -> V) -> Buffer2<V> {
        assert!(self.same_shape(other), "shape mismatch");
        Buffer2 {
            pixels: self
                .pixels
                .iter()
                .zip(other.pixels())
                .map(|(a, b)| f(a, b))
                .collect(),
            width: self.width,
            height: self.height,
        }
    }

    /// Iterate the values whose bit is set in `selection`.
    pub fn values_where<'a>(&'a self, selection: &'a BitBuffer2) -> impl Iterator<Item = &'a T> + 'a {
        assert!(self.same_shape_as_bits(selection), "selection shape mismatch");
        selection.iter_ones().map(move |idx| &self.pixels[idx])
    }
}

impl<T: Copy> Buffer2<T> {
    /// Copy only the pixels selected by `selection` from `src`.
    pub fn copy_where(&mut self, src: &Self, selection: &BitBuffer2) {
        assert!(self.same_shape(src), "shape mismatch");
        assert!(self.same_shape_as_bits(selection), "selection shape mismatch");
        for idx in selection.iter_ones() {
            self.pixels[idx] = src.pixels[idx];
        }
    }
}

impl<T: Default + Clone> Buffer2<T> {
    pub fn new_default(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![T::default(); width * height],
            width,
            height,
        }
    }
}

impl<T: Clone> Buffer2<T> {
    pub fn new_filled(width: usize, height: usize, value: T) -> Self {
        Self {
            pixels: vec![value; width * height],
            width,
            height,
        }
    }
}

impl<T> Index<(usize, usize)> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        &self.pixels[y * self.width + x]
    }
}

impl<T> IndexMut<(usize, usize)> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        &mut self.pixels[y * self.width + x]
    }
}

impl<T> Index<usize> for Buffer2<T> {
    type Output = T;

    #[inline]
    fn index(&self, idx: usize) -> &Self::Output {
        &self.pixels[idx]
    }
}

impl<T> IndexMut<usize> for Buffer2<T> {
    #[inline]
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.pixels[idx]
    }
}

impl<T> Deref for Buffer2<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.pixels
    }
}

impl<T> DerefMut for Buffer2<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.pixels
    }
}

impl<'a, T> IntoIterator for &'a Buffer2<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.pixels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stores_dimensions() {
        let buf = Buffer2::new(3, 2, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(buf.shape(), (3, 2));
        assert_eq!(buf.len(), 6);
    }

    #[test]
    #[should_panic(expected = "pixels length must equal width * height")]
    fn test_new_panics_on_size_mismatch() {
        Buffer2::new(3, 2, vec![1, 2, 3]);
    }

    #[test]
    fn test_from_fn_is_row_major() {
        // x = spatial column, y = spectral row
        let buf = Buffer2::from_fn(3, 2, |x, y| (y * 10 + x) as i32);
        assert_eq!(buf.pixels(), &[0, 1, 2, 10, 11, 12]);
        assert_eq!(buf.row(1), &[10, 11, 12]);
        assert_eq!(buf[(2, 1)], 12);
    }

    #[test]
    fn test_map_and_zip_map() {
        let a = Buffer2::new(2, 1, vec![1.0f32, 4.0]);
        let b = Buffer2::new(2, 1, vec![0.5f32, 2.0]);
        let doubled = a.map(|v| v * 2.0);
        assert_eq!(doubled.pixels(), &[2.0, 8.0]);
        let diff = a.zip_map(&b, |x, y| x - y);
        assert_eq!(diff.pixels(), &[0.5, 2.0]);
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn test_zip_map_shape_mismatch() {
        let a = Buffer2::new(2, 1, vec![1, 2]);
        let b = Buffer2::new(1, 2, vec![1, 2]);
        a.zip_map(&b, |x, y| x + y);
    }

    #[test]
    fn test_copy_where_touches_only_selection() {
        let src = Buffer2::new(2, 2, vec![1, 2, 3, 4]);
        let mut dst = Buffer2::new_filled(2, 2, 0);
        let sel = BitBuffer2::from_slice(2, 2, &[false, true, true, false]);
        dst.copy_where(&src, &sel);
        assert_eq!(dst.pixels(), &[0, 2, 3, 0]);
    }

    #[test]
    fn test_values_where() {
        let buf = Buffer2::new(3, 1, vec![1.0f32, 2.0, 3.0]);
        let sel = BitBuffer2::from_slice(3, 1, &[true, false, true]);
        let picked: Vec<f32> = buf.values_where(&sel).copied().collect();
        assert_eq!(picked, vec![1.0, 3.0]);
    }
}
