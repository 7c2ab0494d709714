//! Authoring-resolution height grid.

use crate::error::{ErosionError, Result};

/// A 2D grid of elevation samples, row-major, values typically in [0, 1].
///
/// The grid never wraps: every edge is a hard edge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeightGrid {
    pub width: usize,
    pub height: usize,
    data: Vec<f32>,
}

impl HeightGrid {
    pub fn new_with(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height {
            return Err(ErosionError::invalid(format!(
                "height buffer has {} samples, expected {}x{} = {}",
                data.len(),
                width,
                height,
                width * height
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Wrap a buffer whose length is already known to match.
    pub(crate) fn from_raw(width: usize, height: usize, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self { width, height, data }
    }

    /// Build a grid by evaluating `f(x, y)` for every cell.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over all cells with their coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        let width = self.width;
        self.data
            .iter()
            .enumerate()
            .map(move |(idx, &h)| (idx % width, idx / width, h))
    }

    /// Sum of all samples, accumulated in f64.
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&h| h as f64).sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum() / self.data.len() as f64
    }

    /// Population variance of the samples.
    pub fn variance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        self.data
            .iter()
            .map(|&h| {
                let d = h as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.data.len() as f64
    }

    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &h| (lo.min(h), hi.max(h)))
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|h| h.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(HeightGrid::from_vec(4, 4, vec![0.0; 15]).is_err());
        assert!(HeightGrid::from_vec(4, 4, vec![0.0; 16]).is_ok());
    }

    #[test]
    fn test_row_major_layout() {
        let grid = HeightGrid::from_fn(3, 2, |x, y| (y * 10 + x) as f32);
        assert_eq!(grid.data(), &[0.0, 1.0, 2.0, 10.0, 11.0, 12.0]);
        assert_eq!(grid.get(2, 1), 12.0);
    }

    #[test]
    fn test_statistics() {
        let grid = HeightGrid::from_vec(2, 2, vec![0.0, 1.0, 0.0, 1.0]).unwrap();
        assert!((grid.sum() - 2.0).abs() < 1e-9);
        assert!((grid.variance() - 0.25).abs() < 1e-9);
        assert_eq!(grid.min_max(), (0.0, 1.0));
        assert_eq!(HeightGrid::new_with(3, 3, 0.5).variance(), 0.0);
    }
}
