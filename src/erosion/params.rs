//! Droplet erosion parameters and presets

use serde::{Deserialize, Serialize};

use crate::error::{ErosionError, Result};

/// Erosion intensity preset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErosionPreset {
    /// Soft weathering, short-lived droplets
    Gentle,
    /// Balanced droplet settings used by the erosion tools
    Standard,
    /// Deep gullies and heavy sediment transport
    Aggressive,
}

impl ErosionPreset {
    pub fn all() -> &'static [Self] {
        &[Self::Gentle, Self::Standard, Self::Aggressive]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Gentle => "Soft weathering",
            Self::Standard => "Balanced erosion",
            Self::Aggressive => "Deep gullies and heavy transport",
        }
    }
}

impl std::fmt::Display for ErosionPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gentle => write!(f, "gentle"),
            Self::Standard => write!(f, "standard"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Droplet simulation parameters.
///
/// No `Default`: every field is chosen per call, either
/// explicitly or through [`ErosionParams::from_preset`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErosionParams {
    /// Momentum conservation (0.0-1.0).
    /// At 0 water instantly turns downhill, at 1 it never changes direction.
    pub inertia: f32,

    /// Multiplier for how much sediment a droplet can carry
    pub sediment_capacity_factor: f32,

    /// Capacity floor, keeps carry capacity away from zero on flat terrain
    pub min_sediment_capacity: f32,

    /// Fraction of free capacity eroded per step (0.0-1.0)
    pub erode_speed: f32,

    /// Fraction of excess sediment deposited per step (0.0-1.0)
    pub deposit_speed: f32,

    /// Water lost per step (0.0-1.0)
    pub evaporate_speed: f32,

    pub gravity: f32,

    /// Maximum number of steps per droplet
    pub max_droplet_lifetime: usize,

    pub initial_water_volume: f32,

    pub initial_speed: f32,
}

impl ErosionParams {
    /// Create parameters from a preset
    pub fn from_preset(preset: ErosionPreset) -> Self {
        let standard = Self {
            inertia: 0.05,
            sediment_capacity_factor: 4.0,
            min_sediment_capacity: 0.01,
            erode_speed: 0.3,
            deposit_speed: 0.3,
            evaporate_speed: 0.01,
            gravity: 4.0,
            max_droplet_lifetime: 30,
            initial_water_volume: 1.0,
            initial_speed: 1.0,
        };

        match preset {
            ErosionPreset::Standard => standard,
            ErosionPreset::Gentle => Self {
                erode_speed: 0.1,
                deposit_speed: 0.5,
                evaporate_speed: 0.03,
                max_droplet_lifetime: 20,
                ..standard
            },
            ErosionPreset::Aggressive => Self {
                inertia: 0.1,
                sediment_capacity_factor: 8.0,
                erode_speed: 0.5,
                deposit_speed: 0.2,
                max_droplet_lifetime: 60,
                ..standard
            },
        }
    }

    /// Reject parameter sets that would make the simulation diverge.
    pub fn validate(&self) -> Result<()> {
        let unit_fields = [
            ("inertia", self.inertia),
            ("erode_speed", self.erode_speed),
            ("deposit_speed", self.deposit_speed),
            ("evaporate_speed", self.evaporate_speed),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(ErosionError::invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        let non_negative = [
            ("sediment_capacity_factor", self.sediment_capacity_factor),
            ("min_sediment_capacity", self.min_sediment_capacity),
            ("gravity", self.gravity),
            ("initial_water_volume", self.initial_water_volume),
            ("initial_speed", self.initial_speed),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ErosionError::invalid(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Constant directional drift applied on top of gradient descent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindBias {
    /// Unit wind vector in simulation-grid axes
    pub dir_x: f32,
    pub dir_y: f32,
    /// Blend weight of the wind against the gradient direction (0.0-1.0)
    pub weight: f32,
}

impl WindBias {
    /// Build a bias from a raw wind vector and a windiness factor.
    ///
    /// The blend weight is `windiness / (1 + windiness)`, so any non-negative
    /// windiness maps into [0, 1).
    pub fn new(direction: (f32, f32), windiness: f32) -> Result<Self> {
        if !windiness.is_finite() || windiness < 0.0 {
            return Err(ErosionError::invalid(format!(
                "windiness must be finite and non-negative, got {}",
                windiness
            )));
        }
        let (x, y) = direction;
        let len = (x * x + y * y).sqrt();
        if !len.is_finite() || len < 1e-6 {
            return Err(ErosionError::invalid(format!(
                "wind direction ({}, {}) has no usable length",
                x, y
            )));
        }
        Ok(Self {
            dir_x: x / len,
            dir_y: y / len,
            weight: windiness / (1.0 + windiness),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for &preset in ErosionPreset::all() {
            assert!(ErosionParams::from_preset(preset).validate().is_ok(), "{}", preset);
        }
    }

    #[test]
    fn test_out_of_range_inertia_rejected() {
        let params = ErosionParams {
            inertia: 1.5,
            ..ErosionParams::from_preset(ErosionPreset::Standard)
        };
        assert!(matches!(
            params.validate(),
            Err(ErosionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_wind_bias_normalizes_direction() {
        let bias = WindBias::new((1.0, 2.0), 0.5).unwrap();
        let len = (bias.dir_x * bias.dir_x + bias.dir_y * bias.dir_y).sqrt();
        assert!((len - 1.0).abs() < 1e-6);
        assert!((bias.weight - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_wind_bias_rejects_zero_direction_and_negative_windiness() {
        assert!(WindBias::new((0.0, 0.0), 0.5).is_err());
        assert!(WindBias::new((1.0, 0.0), -0.1).is_err());
    }
}
