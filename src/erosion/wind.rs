//! Wind erosion: droplets that drift along a fixed wind vector.
//!
//! Runs the hydraulic droplet kernel with a [`WindBias`] at one fixed
//! resolution. Directional deposition leaves single-cell spikes, so the
//! result is always smoothed twice (widths 4 then 2) after upsampling.

use tracing::{debug, info};

use crate::erosion::brush::Brush;
use crate::erosion::executor::Executor;
use crate::erosion::hydraulic::DropletKernel;
use crate::erosion::params::{ErosionParams, WindBias};
use crate::erosion::resample::{downsample, upsample};
use crate::erosion::{check_interior, ErosionStats};
use crate::error::{ErosionError, Result};
use crate::filters::smooth;
use crate::grid::HeightGrid;

/// Smoothing widths applied after every wind pass, in order.
pub const WIND_SMOOTHING: [usize; 2] = [4, 2];

/// Droplets launched for a given windiness: `base_iterations * windiness`.
pub fn wind_iterations(base_iterations: usize, windiness: f32) -> usize {
    (base_iterations as f64 * windiness as f64) as usize
}

/// Single wind-biased erosion pass on `grid`, in place.
///
/// `direction` is normalized internally; `windiness` both weights the wind
/// against the gradient and scales the droplet count. On error `grid` is
/// untouched.
#[allow(clippy::too_many_arguments)]
pub fn wind_erode(
    grid: &mut HeightGrid,
    windiness: f32,
    direction: (f32, f32),
    resolution: usize,
    base_iterations: usize,
    params: &ErosionParams,
    brush_radius: i32,
    seed: u64,
    executor: &Executor,
) -> Result<ErosionStats> {
    params.validate()?;
    let wind = WindBias::new(direction, windiness)?;
    if grid.width < 2 || grid.height < 2 {
        return Err(ErosionError::invalid(format!(
            "heightmap must be at least 2x2, got {}x{}",
            grid.width, grid.height
        )));
    }
    check_interior(resolution, brush_radius)?;
    let brush = Brush::build(brush_radius, resolution)?;
    let iterations = wind_iterations(base_iterations, windiness);

    info!(
        resolution,
        droplets = iterations,
        windiness,
        dir_x = wind.dir_x,
        dir_y = wind.dir_y,
        "wind erosion"
    );

    let kernel = DropletKernel {
        resolution,
        brush: &brush,
        params,
        wind: Some(wind),
        seed,
    };

    let mut sim = downsample(grid, resolution)?;
    let stats = executor.run(&mut sim, &kernel, iterations);
    let mut out = upsample(&sim, std::mem::take(grid))?;

    for width in WIND_SMOOTHING {
        debug!(width, "smoothing wind artifacts");
        out = smooth(&out, width);
    }
    *grid = out;

    debug!(?stats, "wind erosion complete");
    Ok(stats)
}
