//! Slit geometry: edge traces, the slit map and the per-slit selection.

use thiserror::Error;

use common::{BitBuffer2, Buffer2};

use crate::services::Binning;

/// Slit-map value of a pixel that belongs to no slit.
pub const OFF_SLIT: i32 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Edge traces disagree: {left} left edges but {right} right edges")]
    EdgeCountMismatch { left: usize, right: usize },

    #[error("Edge trace for slit {slit} has {rows} rows, expected {expected}")]
    TraceLength {
        slit: usize,
        rows: usize,
        expected: usize,
    },

    #[error("Slit map references slit {slit} but only {num_slits} edge traces exist")]
    UnknownSlit { slit: usize, num_slits: usize },

    #[error("Slit map value {0} is neither a slit index nor the off-slit sentinel")]
    InvalidSlitValue(i32),

    #[error("Slit selection covers {selection} slits but the geometry has {geometry}")]
    SelectionLength { selection: usize, geometry: usize },
}

/// Left and right spatial edge positions of every slit, one value per spectral row.
///
/// Equality is bitwise, so traces holding NaN edges still equal themselves.
#[derive(Debug, Clone)]
pub struct EdgeTraces {
    left: Vec<Vec<f32>>,
    right: Vec<Vec<f32>>,
}

impl PartialEq for EdgeTraces {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: &[Vec<f32>], b: &[Vec<f32>]) -> bool {
            a.len() == b.len()
                && a.iter().zip(b).all(|(a, b)| {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
                })
        }
        same(&self.left, &other.left) && same(&self.right, &other.right)
    }
}

impl EdgeTraces {
    pub fn new(left: Vec<Vec<f32>>, right: Vec<Vec<f32>>) -> Result<Self, Error> {
        if left.len() != right.len() {
            return Err(Error::EdgeCountMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        for (slit, (l, r)) in left.iter().zip(&right).enumerate() {
            if l.len() != r.len() {
                return Err(Error::TraceLength {
                    slit,
                    rows: r.len(),
                    expected: l.len(),
                });
            }
        }
        Ok(Self { left, right })
    }

    /// Straight slits: constant edges over `rows` spectral rows.
    pub fn vertical(edges: &[(f32, f32)], rows: usize) -> Self {
        Self {
            left: edges.iter().map(|&(l, _)| vec![l; rows]).collect(),
            right: edges.iter().map(|&(_, r)| vec![r; rows]).collect(),
        }
    }

    pub fn num_slits(&self) -> usize {
        self.left.len()
    }

    pub fn left(&self, slit: usize) -> &[f32] {
        &self.left[slit]
    }

    pub fn right(&self, slit: usize) -> &[f32] {
        &self.right[slit]
    }

    /// Edges are finite and `left < right` on every row.
    pub fn is_valid(&self, slit: usize) -> bool {
        self.left[slit]
            .iter()
            .zip(&self.right[slit])
            .all(|(&l, &r)| l.is_finite() && r.is_finite() && l < r)
    }
}

/// Per-pixel slit membership.
#[derive(Debug, Clone, PartialEq)]
pub struct SlitMap {
    map: Buffer2<i32>,
}

impl SlitMap {
    /// Wrap an existing map. Values must be a slit index or [`OFF_SLIT`].
    pub fn new(map: Buffer2<i32>) -> Result<Self, Error> {
        if let Some(&bad) = map.iter().find(|&&v| v < OFF_SLIT) {
            return Err(Error::InvalidSlitValue(bad));
        }
        Ok(Self { map })
    }

    /// Rasterise edge traces: a pixel belongs to the first slit whose edges
    /// bracket its column. Edge positions are in unbinned detector pixels.
    pub fn from_edges(edges: &EdgeTraces, binning: Binning, width: usize, height: usize) -> Self {
        let scale = 1.0 / binning.spatial.max(1) as f32;
        let mut map = Buffer2::new_filled(width, height, OFF_SLIT);
        for slit in 0..edges.num_slits() {
            let (left, right) = (edges.left(slit), edges.right(slit));
            for y in 0..height.min(left.len()) {
                let (l, r) = (left[y] * scale, right[y] * scale);
                if !(l.is_finite() && r.is_finite() && l < r) {
                    continue;
                }
                let start = l.ceil().max(0.0) as usize;
                let end = (r.floor().max(-1.0) + 1.0) as usize;
                for x in start..end.min(width) {
                    let value = map.get_mut(x, y);
                    if *value == OFF_SLIT {
                        *value = slit as i32;
                    }
                }
            }
        }
        Self { map }
    }

    pub fn buffer(&self) -> &Buffer2<i32> {
        &self.map
    }

    pub fn width(&self) -> usize {
        self.map.width()
    }

    pub fn height(&self) -> usize {
        self.map.height()
    }

    #[inline]
    pub fn slit_at(&self, x: usize, y: usize) -> Option<usize> {
        let v = *self.map.get(x, y);
        (v >= 0).then_some(v as usize)
    }

    /// Pixels belonging to `slit`.
    pub fn slit_pixels(&self, slit: usize) -> BitBuffer2 {
        let target = slit as i32;
        BitBuffer2::from_fn(self.width(), self.height(), |i| self.map[i] == target)
    }

    /// Pixels outside every slit.
    pub fn off_slit_pixels(&self) -> BitBuffer2 {
        BitBuffer2::from_fn(self.width(), self.height(), |i| self.map[i] == OFF_SLIT)
    }

    /// Largest slit index present, if any pixel is on a slit.
    pub fn max_slit(&self) -> Option<usize> {
        self.map
            .iter()
            .copied()
            .filter(|&v| v >= 0)
            .max()
            .map(|v| v as usize)
    }
}

/// Edge traces together with the slit map derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct SlitGeometry {
    edges: EdgeTraces,
    slit_map: SlitMap,
}

impl SlitGeometry {
    pub fn new(edges: EdgeTraces, slit_map: SlitMap) -> Result<Self, Error> {
        if let Some(slit) = slit_map.max_slit() {
            if slit >= edges.num_slits() {
                return Err(Error::UnknownSlit {
                    slit,
                    num_slits: edges.num_slits(),
                });
            }
        }
        for slit in 0..edges.num_slits() {
            let rows = edges.left(slit).len();
            if rows != slit_map.height() {
                return Err(Error::TraceLength {
                    slit,
                    rows,
                    expected: slit_map.height(),
                });
            }
        }
        Ok(Self { edges, slit_map })
    }

    pub fn edges(&self) -> &EdgeTraces {
        &self.edges
    }

    pub fn slit_map(&self) -> &SlitMap {
        &self.slit_map
    }

    pub fn num_slits(&self) -> usize {
        self.edges.num_slits()
    }
}

/// One entry per slit, `true` = excluded from further processing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlitSelection {
    excluded: Vec<bool>,
}

impl SlitSelection {
    /// Every slit selected for processing.
    pub fn all_good(num_slits: usize) -> Self {
        Self {
            excluded: vec![false; num_slits],
        }
    }

    pub fn from_excluded(excluded: Vec<bool>) -> Self {
        Self { excluded }
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn exclude(&mut self, slit: usize) {
        self.excluded[slit] = true;
    }

    pub fn is_excluded(&self, slit: usize) -> bool {
        self.excluded[slit]
    }

    pub fn excluded(&self) -> &[bool] {
        &self.excluded
    }

    /// Indices of slits still selected, ascending.
    pub fn good_slits(&self) -> Vec<usize> {
        self.excluded
            .iter()
            .enumerate()
            .filter(|(_, &ex)| !ex)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn num_good(&self) -> usize {
        self.excluded.iter().filter(|&&ex| !ex).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_count_mismatch() {
        let err = EdgeTraces::new(vec![vec![1.0]], vec![]).unwrap_err();
        assert_eq!(err, Error::EdgeCountMismatch { left: 1, right: 0 });
    }

    #[test]
    fn test_edge_validity() {
        let edges = EdgeTraces::new(
            vec![vec![1.0, 1.0], vec![5.0, 5.0]],
            vec![vec![3.0, 3.0], vec![6.0, 4.0]],
        )
        .unwrap();
        assert!(edges.is_valid(0));
        // second row has left > right
        assert!(!edges.is_valid(1));
    }

    #[test]
    fn test_nan_edges_equal_themselves() {
        let edges = EdgeTraces::new(vec![vec![f32::NAN, 1.0]], vec![vec![3.0, 3.0]]).unwrap();
        assert!(!edges.is_valid(0));
        assert_eq!(edges, edges.clone());

        let moved = EdgeTraces::new(vec![vec![f32::NAN, 2.0]], vec![vec![3.0, 3.0]]).unwrap();
        assert_ne!(edges, moved);
    }

    #[test]
    fn test_from_edges_rasterises_columns() {
        let edges = EdgeTraces::vertical(&[(1.0, 2.0), (4.0, 6.0)], 2);
        let map = SlitMap::from_edges(&edges, Binning::default(), 8, 2);
        assert_eq!(map.buffer().row(0), &[-1, 0, 0, -1, 1, 1, 1, -1]);
        assert_eq!(map.slit_at(5, 1), Some(1));
        assert_eq!(map.slit_at(3, 1), None);
        assert_eq!(map.max_slit(), Some(1));
        assert_eq!(map.slit_pixels(0).count_ones(), 4);
        assert_eq!(map.off_slit_pixels().count_ones(), 6);
    }

    #[test]
    fn test_from_edges_applies_spatial_binning() {
        let edges = EdgeTraces::vertical(&[(2.0, 4.0)], 1);
        let map = SlitMap::from_edges(
            &edges,
            Binning {
                spectral: 1,
                spatial: 2,
            },
            4,
            1,
        );
        assert_eq!(map.buffer().row(0), &[-1, 0, 0, -1]);
    }

    #[test]
    fn test_from_edges_skips_invalid_rows() {
        let edges = EdgeTraces::new(vec![vec![1.0, 3.0]], vec![vec![2.0, 1.0]]).unwrap();
        let map = SlitMap::from_edges(&edges, Binning::default(), 4, 2);
        assert_eq!(map.buffer().row(1), &[-1, -1, -1, -1]);
    }

    #[test]
    fn test_slit_map_rejects_bad_values() {
        let buf = Buffer2::new(2, 1, vec![0, -3]);
        assert_eq!(SlitMap::new(buf).unwrap_err(), Error::InvalidSlitValue(-3));
    }

    #[test]
    fn test_geometry_requires_edges_for_every_slit() {
        let edges = EdgeTraces::vertical(&[(0.0, 1.0)], 1);
        let map = SlitMap::new(Buffer2::new(3, 1, vec![0, -1, 1])).unwrap();
        assert_eq!(
            SlitGeometry::new(edges, map).unwrap_err(),
            Error::UnknownSlit {
                slit: 1,
                num_slits: 1
            }
        );
    }

    #[test]
    fn test_geometry_requires_full_length_traces() {
        let edges = EdgeTraces::vertical(&[(0.0, 1.0)], 3);
        let map = SlitMap::new(Buffer2::new(2, 2, vec![0, 0, 0, 0])).unwrap();
        assert!(matches!(
            SlitGeometry::new(edges, map),
            Err(Error::TraceLength { rows: 3, expected: 2, .. })
        ));
    }

    #[test]
    fn test_selection() {
        let mut sel = SlitSelection::all_good(4);
        sel.exclude(2);
        assert_eq!(sel.good_slits(), vec![0, 1, 3]);
        assert_eq!(sel.num_good(), 3);
        assert!(sel.is_excluded(2));
    }
}
