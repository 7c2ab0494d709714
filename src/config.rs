//! Erosion tool settings, loadable from JSON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "seed": 7, "hydraulic": { "steps": 2 }, "wind": { "windiness": 1.5 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::erosion::{ErosionParams, ErosionPreset, ExecutorKind};
use crate::error::{ErosionError, Result};
use crate::filters::SharpenParams;

/// Upper bound on hydraulic passes
pub const MAX_EROSION_STEPS: u32 = 8;
pub const MAX_WINDINESS: f32 = 5.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub seed: u64,
    pub executor: ExecutorKind,
    /// Brush radius shared by hydraulic and wind erosion
    pub brush_radius: i32,
    pub hydraulic: HydraulicSettings,
    pub wind: WindSettings,
    pub terrace: TerraceSettings,
    pub sharpen: SharpenParams,
    /// Box half-width of the smooth tool
    pub smoothing_width: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            executor: ExecutorKind::default(),
            brush_radius: 2,
            hydraulic: HydraulicSettings::default(),
            wind: WindSettings::default(),
            terrace: TerraceSettings::default(),
            sharpen: SharpenParams {
                strength: 5.0,
                peak_mix: 0.7,
                iterations: 10,
            },
            smoothing_width: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HydraulicSettings {
    /// Droplets in the first pass; doubled every pass
    pub iterations: usize,
    /// Simulation resolution of the first pass (plus one); doubled every pass
    pub resolution: usize,
    /// Number of passes (1-8)
    pub steps: u32,
    pub params: ErosionParams,
}

impl Default for HydraulicSettings {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            resolution: 256,
            steps: 3,
            params: ErosionParams::from_preset(ErosionPreset::Standard),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindSettings {
    /// Wind strength (0-5); also scales the droplet count
    pub windiness: f32,
    /// Wind vector in simulation-grid axes, need not be normalized
    pub direction: [f32; 2],
    pub resolution: usize,
    /// Droplets launched at windiness 1.0
    pub base_iterations: usize,
    pub params: ErosionParams,
}

impl Default for WindSettings {
    fn default() -> Self {
        Self {
            windiness: 0.5,
            direction: [1.0, 2.0],
            resolution: 257,
            base_iterations: 600_000,
            params: ErosionParams::from_preset(ErosionPreset::Standard),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraceSettings {
    /// Band height in world units
    pub spacing: f32,
    /// Slopes steeper than this (degrees, 0-90) keep their shape
    pub angle_deg: f32,
}

impl Default for TerraceSettings {
    fn default() -> Self {
        Self {
            spacing: 15.0,
            angle_deg: 20.0,
        }
    }
}

impl ToolSettings {
    /// Load settings from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every tool's ranges. Runs before any tool touches a heightmap.
    pub fn validate(&self) -> Result<()> {
        if self.brush_radius <= 0 {
            return Err(ErosionError::invalid(format!(
                "brush radius must be positive, got {}",
                self.brush_radius
            )));
        }

        if !(1..=MAX_EROSION_STEPS).contains(&self.hydraulic.steps) {
            return Err(ErosionError::invalid(format!(
                "erosion steps must be within 1..={}, got {}",
                MAX_EROSION_STEPS, self.hydraulic.steps
            )));
        }
        self.hydraulic.params.validate()?;

        if !(0.0..=MAX_WINDINESS).contains(&self.wind.windiness) {
            return Err(ErosionError::invalid(format!(
                "windiness must be within [0, {}], got {}",
                MAX_WINDINESS, self.wind.windiness
            )));
        }
        let [dx, dy] = self.wind.direction;
        if !(dx * dx + dy * dy).is_normal() {
            return Err(ErosionError::invalid(format!(
                "wind direction ({}, {}) has no usable length",
                dx, dy
            )));
        }
        self.wind.params.validate()?;

        if !(0.0..=90.0).contains(&self.terrace.angle_deg) {
            return Err(ErosionError::invalid(format!(
                "terrace angle must be within [0, 90] degrees, got {}",
                self.terrace.angle_deg
            )));
        }
        if !self.terrace.spacing.is_finite() || self.terrace.spacing <= 0.0 {
            return Err(ErosionError::invalid(format!(
                "terrace spacing must be positive, got {}",
                self.terrace.spacing
            )));
        }

        self.sharpen.validate()
    }
}
