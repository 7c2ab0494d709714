//! Convolution post-processing on the authoring-resolution grid.
//!
//! - **Smooth**: clamped box blur
//! - **Sharpen**: unsharp mask with a peak-preserving mix, iterated
//! - **Terrace**: quantize gentle slopes into height bands, then soften
//!
//! All filters are pure: they read one grid and return a new one.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ErosionError, Result};
use crate::grid::HeightGrid;

/// Box blur over a `(2 * width + 1)²` window.
///
/// Windows are clipped at the grid edge, so border cells average fewer
/// samples. `width == 0` returns an identical grid.
pub fn smooth(grid: &HeightGrid, width: usize) -> HeightGrid {
    if width == 0 || grid.is_empty() {
        return grid.clone();
    }

    let w = grid.width;
    let h = grid.height;
    let r = width as isize;
    let src = grid.data();
    let mut out = vec![0.0f32; w * h];

    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let y0 = (y as isize - r).max(0) as usize;
        let y1 = ((y as isize + r) as usize).min(h - 1);
        for (x, cell) in row.iter_mut().enumerate() {
            let x0 = (x as isize - r).max(0) as usize;
            let x1 = ((x as isize + r) as usize).min(w - 1);

            let mut sum = 0.0f32;
            for yy in y0..=y1 {
                sum += src[yy * w + x0..=yy * w + x1].iter().sum::<f32>();
            }
            let count = ((y1 - y0 + 1) * (x1 - x0 + 1)) as f32;
            *cell = sum / count;
        }
    });

    HeightGrid::from_raw(w, h, out)
}

/// Unsharp-mask settings
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharpenParams {
    /// Multiplier on the difference between a cell and its blurred neighbourhood
    pub strength: f32,
    /// How much of the peak-only sharpening replaces the plain sharpening (0.0-1.0)
    pub peak_mix: f32,
    /// Number of sequential passes
    pub iterations: usize,
}

impl SharpenParams {
    pub fn validate(&self) -> Result<()> {
        if !self.strength.is_finite() || self.strength < 0.0 {
            return Err(ErosionError::invalid(format!(
                "sharpen strength must be finite and non-negative, got {}",
                self.strength
            )));
        }
        if !(0.0..=1.0).contains(&self.peak_mix) {
            return Err(ErosionError::invalid(format!(
                "peak mix strength must be within [0, 1], got {}",
                self.peak_mix
            )));
        }
        Ok(())
    }
}

/// Sharpen `grid`, each pass operating on the previous pass's output.
///
/// Per cell: `detail = h - blur(h)`, `sharp = h + strength * detail`,
/// `peak = h + strength * max(detail, 0)`, result
/// `clamp(lerp(sharp, peak, peak_mix), 0, 1)`. With a full peak mix only
/// ridges and summits are pushed up; valleys stay where they were.
pub fn sharpen(grid: &HeightGrid, params: &SharpenParams) -> Result<HeightGrid> {
    params.validate()?;

    let mut current = grid.clone();
    for _ in 0..params.iterations {
        let blurred = smooth(&current, 1);
        let data: Vec<f32> = current
            .data()
            .par_iter()
            .zip(blurred.data().par_iter())
            .map(|(&h, &b)| {
                let detail = h - b;
                let sharp = h + params.strength * detail;
                let peak = h + params.strength * detail.max(0.0);
                (sharp + (peak - sharp) * params.peak_mix).clamp(0.0, 1.0)
            })
            .collect();
        current = HeightGrid::from_raw(current.width, current.height, data);
    }
    Ok(current)
}

/// Terracing settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerraceParams {
    /// Band height in world units
    pub spacing: f32,
    /// Slopes steeper than this (degrees) are left alone
    pub angle_deg: f32,
    /// World height of a grid value of 1.0
    pub vertical_scale: f32,
    /// World extent of the grid along x
    pub horizontal_size: f32,
}

impl TerraceParams {
    pub fn validate(&self) -> Result<()> {
        if !self.spacing.is_finite() || self.spacing <= 0.0 {
            return Err(ErosionError::invalid(format!(
                "terrace spacing must be positive, got {}",
                self.spacing
            )));
        }
        if !(0.0..=90.0).contains(&self.angle_deg) {
            return Err(ErosionError::invalid(format!(
                "terrace angle must be within [0, 90] degrees, got {}",
                self.angle_deg
            )));
        }
        if !self.vertical_scale.is_finite() || self.vertical_scale <= 0.0 {
            return Err(ErosionError::invalid("vertical scale must be positive"));
        }
        if !self.horizontal_size.is_finite() || self.horizontal_size <= 0.0 {
            return Err(ErosionError::invalid("horizontal size must be positive"));
        }
        Ok(())
    }
}

/// Snap gentle slopes to multiples of `spacing`, then smooth with width 1.
pub fn terrace(grid: &HeightGrid, params: &TerraceParams) -> Result<HeightGrid> {
    params.validate()?;
    if grid.width < 2 || grid.height < 2 {
        return Err(ErosionError::invalid(format!(
            "terrace needs at least a 2x2 grid, got {}x{}",
            grid.width, grid.height
        )));
    }

    let w = grid.width;
    let h = grid.height;
    let src = grid.data();
    let cell_size = params.horizontal_size / (w - 1) as f32;
    let max_tan = params.angle_deg.to_radians().tan();
    let vs = params.vertical_scale;

    let mut out = vec![0.0f32; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let center = src[y * w + x];
            let mut max_diff = 0.0f32;
            for (dx, dy) in [(-1isize, 0isize), (1, 0), (0, -1), (0, 1)] {
                let nx = x as isize + dx;
                let ny = y as isize + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                max_diff = max_diff.max((src[ny as usize * w + nx as usize] - center).abs());
            }

            let slope = max_diff * vs / cell_size;
            *cell = if slope < max_tan {
                (center * vs / params.spacing).round() * params.spacing / vs
            } else {
                center
            };
        }
    });

    let stepped = HeightGrid::from_raw(w, h, out);
    Ok(smooth(&stepped, 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn noisy(size: usize, seed: u64) -> HeightGrid {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        HeightGrid::from_fn(size, size, |_, _| rng.gen_range(0.2..0.8))
    }

    #[test]
    fn test_smooth_width_zero_is_identity() {
        let grid = noisy(17, 1);
        assert_eq!(smooth(&grid, 0), grid);
    }

    #[test]
    fn test_smooth_reduces_variance() {
        let grid = noisy(33, 2);
        for width in 1..=4 {
            let blurred = smooth(&grid, width);
            assert!(blurred.variance() <= grid.variance());
        }
    }

    #[test]
    fn test_smooth_edges_average_fewer_cells() {
        let mut grid = HeightGrid::new_with(5, 5, 0.0);
        grid.set(0, 0, 9.0);
        let blurred = smooth(&grid, 1);
        // Corner window is 2x2, interior neighbour window is 3x3
        assert!((blurred.get(0, 0) - 9.0 / 4.0).abs() < 1e-6);
        assert!((blurred.get(1, 1) - 1.0).abs() < 1e-6);
        assert_eq!(blurred.get(3, 3), 0.0);
    }

    #[test]
    fn test_sharpen_raises_peak() {
        let mut grid = HeightGrid::new_with(9, 9, 0.4);
        grid.set(4, 4, 0.5);
        let params = SharpenParams {
            strength: 2.0,
            peak_mix: 0.7,
            iterations: 1,
        };
        let out = sharpen(&grid, &params).unwrap();
        assert!(out.get(4, 4) > 0.5);
        assert!(out.data().iter().all(|&h| (0.0..=1.0).contains(&h)));
    }

    #[test]
    fn test_full_peak_mix_leaves_valleys() {
        let mut grid = HeightGrid::new_with(9, 9, 0.6);
        grid.set(4, 4, 0.3);
        let params = SharpenParams {
            strength: 3.0,
            peak_mix: 1.0,
            iterations: 1,
        };
        let out = sharpen(&grid, &params).unwrap();
        assert!((out.get(4, 4) - 0.3).abs() < 1e-6);

        let plain = sharpen(&grid, &SharpenParams { peak_mix: 0.0, ..params }).unwrap();
        assert!(plain.get(4, 4) < 0.3);
    }

    #[test]
    fn test_sharpen_iterations_compound() {
        let grid = noisy(17, 3);
        let once = sharpen(&grid, &SharpenParams { strength: 1.0, peak_mix: 0.0, iterations: 1 }).unwrap();
        let twice = sharpen(&grid, &SharpenParams { strength: 1.0, peak_mix: 0.0, iterations: 2 }).unwrap();
        let again = sharpen(&once, &SharpenParams { strength: 1.0, peak_mix: 0.0, iterations: 1 }).unwrap();
        assert_eq!(twice, again);
        assert_eq!(sharpen(&grid, &SharpenParams { strength: 1.0, peak_mix: 0.0, iterations: 0 }).unwrap(), grid);
    }

    #[test]
    fn test_terrace_flat_grid_snaps_to_band() {
        let grid = HeightGrid::new_with(16, 16, 0.5);
        let params = TerraceParams {
            spacing: 0.15,
            angle_deg: 20.0,
            vertical_scale: 1.0,
            horizontal_size: 15.0,
        };
        let out = terrace(&grid, &params).unwrap();
        let expected = (0.5f32 / 0.15).round() * 0.15;
        assert!(out.data().iter().all(|&h| (h - expected).abs() < 1e-5));
    }

    #[test]
    fn test_terrace_leaves_steep_slopes() {
        // 0.1 per cell with a vertical scale of 100 over 1-unit cells is ~84 degrees
        let grid = HeightGrid::from_fn(8, 8, |x, _| x as f32 * 0.1);
        let params = TerraceParams {
            spacing: 15.0,
            angle_deg: 20.0,
            vertical_scale: 100.0,
            horizontal_size: 7.0,
        };
        let out = terrace(&grid, &params).unwrap();
        assert_eq!(out, smooth(&grid, 1));
    }

    #[test]
    fn test_invalid_filter_params_rejected() {
        let grid = noisy(8, 4);
        assert!(sharpen(&grid, &SharpenParams { strength: 1.0, peak_mix: 1.5, iterations: 1 }).is_err());
        let bad = TerraceParams {
            spacing: 0.0,
            angle_deg: 20.0,
            vertical_scale: 1.0,
            horizontal_size: 1.0,
        };
        assert!(terrace(&grid, &bad).is_err());
    }
}
