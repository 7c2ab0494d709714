//! Terrain erosion library
//!
//! Re-exports modules for use by binaries and tools.

pub mod config;
pub mod erosion;
pub mod error;
pub mod filters;
pub mod grid;
pub mod heightmap;
pub mod terrain;

pub use config::ToolSettings;
pub use erosion::{ErosionParams, ErosionPreset, ErosionStats, ErosionTools, ExecutorKind};
pub use error::{ErosionError, Result};
pub use grid::HeightGrid;
pub use terrain::{MemoryTerrain, PngTerrain, TerrainStore};
