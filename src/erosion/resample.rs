//! Resampling between the authoring grid and the simulation grid.
//!
//! Downsampling maps each simulation cell onto a single source cell (nearest
//! index, no filtering); upsampling blends bilinearly.

use crate::error::{ErosionError, Result};
use crate::grid::HeightGrid;

/// Square working buffer for one erosion pass.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationGrid {
    pub resolution: usize,
    pub data: Vec<f32>,
}

impl SimulationGrid {
    pub fn new_with(resolution: usize, value: f32) -> Self {
        Self {
            resolution,
            data: vec![value; resolution * resolution],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.resolution + x]
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&h| h as f64).sum()
    }
}

/// Sample `src` onto a `target_res`² simulation grid.
///
/// Cell `(x, y)` reads source `floor(x / (target_res - 1) * (width - 1))`
/// (likewise for `y`).
pub fn downsample(src: &HeightGrid, target_res: usize) -> Result<SimulationGrid> {
    if target_res < 2 {
        return Err(ErosionError::invalid(format!(
            "simulation resolution must be at least 2, got {}",
            target_res
        )));
    }
    if src.is_empty() {
        return Err(ErosionError::invalid("cannot downsample an empty grid"));
    }

    let span = (target_res - 1) as f32;
    let src_w = (src.width - 1) as f32;
    let src_h = (src.height - 1) as f32;

    let mut data = Vec::with_capacity(target_res * target_res);
    for y in 0..target_res {
        let sy = ((y as f32 / span) * src_h).floor() as usize;
        let sy = sy.min(src.height - 1);
        for x in 0..target_res {
            let sx = ((x as f32 / span) * src_w).floor() as usize;
            data.push(src.get(sx.min(src.width - 1), sy));
        }
    }

    Ok(SimulationGrid {
        resolution: target_res,
        data,
    })
}

/// Blend `sim` back onto the authoring grid `prior`.
///
/// Cells whose bilinear neighbour would fall past the last simulation row or
/// column keep their value from `prior`.
pub fn upsample(sim: &SimulationGrid, prior: HeightGrid) -> Result<HeightGrid> {
    if sim.resolution < 2 {
        return Err(ErosionError::invalid(format!(
            "simulation resolution must be at least 2, got {}",
            sim.resolution
        )));
    }
    if prior.width < 2 || prior.height < 2 {
        return Err(ErosionError::invalid(format!(
            "authoring grid must be at least 2x2, got {}x{}",
            prior.width, prior.height
        )));
    }

    let mut out = prior;
    let res = sim.resolution;
    let span = (res - 1) as f32;
    let dst_w = (out.width - 1) as f32;
    let dst_h = (out.height - 1) as f32;

    for y in 0..out.height {
        let py = (y as f32 / dst_h) * span;
        let y1 = py.floor() as usize;
        let y2 = y1 + 1;
        let ty = py - py.floor();
        if y2 >= res {
            continue;
        }

        for x in 0..out.width {
            let px = (x as f32 / dst_w) * span;
            let x1 = px.floor() as usize;
            let x2 = x1 + 1;
            let tx = px - px.floor();
            if x2 >= res {
                continue;
            }

            let top = lerp(sim.get(x1, y1), sim.get(x2, y1), tx);
            let bottom = lerp(sim.get(x1, y2), sim.get(x2, y2), tx);
            out.set(x, y, lerp(top, bottom, ty));
        }
    }

    Ok(out)
}

#[inline]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
