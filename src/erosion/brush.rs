//! Circular erosion brush with linear distance falloff.

use crate::error::{ErosionError, Result};

/// Precomputed erosion kernel: flattened index offsets and normalized weights.
///
/// Offsets are flattened against a row stride, so a brush is only valid for
/// grids of that width.
#[derive(Clone, Debug, PartialEq)]
pub struct Brush {
    pub radius: i32,
    pub stride: usize,
    pub offsets: Vec<i32>,
    pub weights: Vec<f32>,
}

impl Brush {
    /// Build a brush covering every offset with `dx² + dy² < radius²`.
    ///
    /// Each cell is weighted `1 - dist / radius`, then weights are normalized
    /// to sum to 1.
    pub fn build(radius: i32, stride: usize) -> Result<Self> {
        if radius <= 0 {
            return Err(ErosionError::invalid(format!(
                "brush radius must be positive, got {}",
                radius
            )));
        }
        if stride == 0 {
            return Err(ErosionError::invalid("brush stride must be positive"));
        }

        let mut offsets = Vec::new();
        let mut weights = Vec::new();
        let mut weight_sum = 0.0f32;
        let r_sq = radius * radius;
        let stride_i = stride as i32;

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let dist_sq = dx * dx + dy * dy;
                if dist_sq < r_sq {
                    let weight = 1.0 - (dist_sq as f32).sqrt() / radius as f32;
                    offsets.push(dy * stride_i + dx);
                    weights.push(weight);
                    weight_sum += weight;
                }
            }
        }

        for w in weights.iter_mut() {
            *w /= weight_sum;
        }

        Ok(Self {
            radius,
            stride,
            offsets,
            weights,
        })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterate `(offset, weight)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (i32, f32)> + '_ {
        self.offsets.iter().copied().zip(self.weights.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        for radius in 1..=6 {
            let brush = Brush::build(radius, 128).unwrap();
            let total: f32 = brush.weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-5, "radius {} sums to {}", radius, total);
        }
    }

    #[test]
    fn test_radius_two_covers_3x3() {
        let brush = Brush::build(2, 10).unwrap();
        assert_eq!(brush.len(), 9);
        let mut offsets = brush.offsets.clone();
        offsets.sort();
        assert_eq!(offsets, vec![-11, -10, -9, -1, 0, 1, 9, 10, 11]);

        // Centre carries the most weight
        let centre = brush.iter().find(|&(o, _)| o == 0).unwrap().1;
        assert!(brush.weights.iter().all(|&w| w <= centre));
    }

    #[test]
    fn test_radius_one_is_single_cell() {
        let brush = Brush::build(1, 64).unwrap();
        assert_eq!(brush.offsets, vec![0]);
        assert!((brush.weights[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_radius_rejected() {
        assert!(Brush::build(0, 64).is_err());
        assert!(Brush::build(-3, 64).is_err());
    }
}
