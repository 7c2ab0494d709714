//! Fractal Perlin heightmaps for seeding the erosion tools, with an optional
//! falloff that sinks the borders into a basin.

use noise::{NoiseFn, Perlin, Seedable};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ErosionError, Result};
use crate::grid::HeightGrid;

// =============================================================================
// NOISE PARAMETERS
// =============================================================================

/// Range of the random per-octave sample offsets
const OCTAVE_OFFSET_RANGE: i32 = 100_000;

// Falloff curve shape: value^a / (value^a + (b - b*value)^a)
const FALLOFF_A: f32 = 3.0;
const FALLOFF_B: f32 = 2.2;

/// How raw fBm values are mapped into [0, 1]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Stretch this map's own min..max onto 0..1
    #[default]
    Local,
    /// Divide by the largest height the octaves could reach, so
    /// neighbouring maps with the same settings line up
    Global,
}

/// Fractal Perlin noise settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    /// Number of noise octaves
    pub octaves: u32,
    /// Feature size in cells (higher = larger features)
    pub scale: f64,
    /// Amplitude decay per octave (0.0-1.0)
    pub persistence: f64,
    /// Frequency multiplier per octave
    pub lacunarity: f64,
    pub seed: u64,
    pub offset: [f64; 2],
    pub normalize: NormalizeMode,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            octaves: 6,
            scale: 50.0,
            persistence: 0.6,
            lacunarity: 2.0,
            seed: 0,
            offset: [0.0, 0.0],
            normalize: NormalizeMode::Local,
        }
    }
}

impl NoiseSettings {
    pub fn validate(&self) -> Result<()> {
        if self.octaves == 0 {
            return Err(ErosionError::invalid("noise needs at least one octave"));
        }
        if !self.scale.is_finite() || self.scale < 0.01 {
            return Err(ErosionError::invalid(format!(
                "noise scale must be at least 0.01, got {}",
                self.scale
            )));
        }
        if !(0.0..=1.0).contains(&self.persistence) {
            return Err(ErosionError::invalid(format!(
                "persistence must be within [0, 1], got {}",
                self.persistence
            )));
        }
        if !self.lacunarity.is_finite() || self.lacunarity < 1.0 {
            return Err(ErosionError::invalid(format!(
                "lacunarity must be at least 1, got {}",
                self.lacunarity
            )));
        }
        Ok(())
    }
}

// =============================================================================
// HEIGHTMAP GENERATION
// =============================================================================

/// Generate a `width` x `height` heightmap in [0, 1]:
/// 1. Multi-octave Perlin fBm, each octave sampled at a random offset
/// 2. Local or global normalization
/// 3. Optional square falloff that sinks the borders to zero
pub fn generate_heightmap(width: usize, height: usize, settings: &NoiseSettings, use_falloff: bool) -> Result<HeightGrid> {
    settings.validate()?;
    if width == 0 || height == 0 {
        return Err(ErosionError::invalid(format!(
            "heightmap must not be empty, got {}x{}",
            width, height
        )));
    }

    let noise = Perlin::new(1).set_seed(settings.seed as u32);
    let mut rng = ChaCha8Rng::seed_from_u64(settings.seed);

    let mut octave_offsets = Vec::with_capacity(settings.octaves as usize);
    let mut max_possible = 0.0;
    let mut amplitude = 1.0;
    for _ in 0..settings.octaves {
        let ox = rng.gen_range(-OCTAVE_OFFSET_RANGE..OCTAVE_OFFSET_RANGE) as f64 + settings.offset[0];
        let oy = rng.gen_range(-OCTAVE_OFFSET_RANGE..OCTAVE_OFFSET_RANGE) as f64 - settings.offset[1];
        octave_offsets.push((ox, oy));
        max_possible += amplitude;
        amplitude *= settings.persistence;
    }

    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;

    let mut raw = vec![0.0f64; width * height];
    raw.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let mut amplitude = 1.0;
            let mut frequency = 1.0;
            let mut total = 0.0;
            for &(ox, oy) in &octave_offsets {
                let sx = (x as f64 - half_w + ox) / settings.scale * frequency;
                let sy = (y as f64 - half_h + oy) / settings.scale * frequency;
                total += noise.get([sx, sy]) * amplitude;
                amplitude *= settings.persistence;
                frequency *= settings.lacunarity;
            }
            *cell = total;
        }
    });

    let data: Vec<f32> = match settings.normalize {
        NormalizeMode::Local => {
            let (lo, hi) = raw
                .iter()
                .fold((f64::MAX, f64::MIN), |(lo, hi), &h| (lo.min(h), hi.max(h)));
            let range = hi - lo;
            raw.iter()
                .map(|&h| if range > 0.0 { ((h - lo) / range) as f32 } else { 0.0 })
                .collect()
        }
        NormalizeMode::Global => raw
            .iter()
            .map(|&h| ((h + 1.0) / (max_possible / 0.9)).clamp(0.0, 1.0) as f32)
            .collect(),
    };

    let mut grid = HeightGrid::from_vec(width, height, data)?;
    if use_falloff {
        let falloff = falloff_map(width, height);
        for (h, f) in grid.data_mut().iter_mut().zip(falloff.data()) {
            *h = (*h - f).clamp(0.0, 1.0);
        }
    }
    Ok(grid)
}

/// Square falloff mask: 0 in the middle rising to 1 at the border.
pub fn falloff_map(width: usize, height: usize) -> HeightGrid {
    HeightGrid::from_fn(width, height, |x, y| {
        let fx = x as f32 / width as f32 * 2.0 - 1.0;
        let fy = y as f32 / height as f32 * 2.0 - 1.0;
        falloff_curve(fx.abs().max(fy.abs()))
    })
}

fn falloff_curve(value: f32) -> f32 {
    let a = value.powf(FALLOFF_A);
    a / (a + (FALLOFF_B - FALLOFF_B * value).powf(FALLOFF_A))
}
