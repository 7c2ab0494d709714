//! Terrain data stores the erosion tools read from and write back to.

use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};
use tracing::debug;

use crate::error::Result;
use crate::grid::HeightGrid;

/// Elevation storage owned by the caller.
///
/// Heights are exchanged normalized to [0, 1]; `vertical_scale` and
/// `horizontal_size` give their world extent.
pub trait TerrainStore {
    fn read_heights(&self) -> Result<HeightGrid>;

    fn write_heights(&mut self, grid: &HeightGrid) -> Result<()>;

    /// World height of a normalized value of 1.0
    fn vertical_scale(&self) -> f32;

    /// World extent of the heightmap along x
    fn horizontal_size(&self) -> f32;
}

/// Heightmap held in memory
#[derive(Clone, Debug)]
pub struct MemoryTerrain {
    grid: HeightGrid,
    vertical_scale: f32,
    horizontal_size: f32,
}

impl MemoryTerrain {
    pub fn new(grid: HeightGrid, vertical_scale: f32, horizontal_size: f32) -> Self {
        Self {
            grid,
            vertical_scale,
            horizontal_size,
        }
    }

    pub fn grid(&self) -> &HeightGrid {
        &self.grid
    }
}

impl TerrainStore for MemoryTerrain {
    fn read_heights(&self) -> Result<HeightGrid> {
        Ok(self.grid.clone())
    }

    fn write_heights(&mut self, grid: &HeightGrid) -> Result<()> {
        self.grid = grid.clone();
        Ok(())
    }

    fn vertical_scale(&self) -> f32 {
        self.vertical_scale
    }

    fn horizontal_size(&self) -> f32 {
        self.horizontal_size
    }
}

/// 16-bit grayscale PNG heightmap.
///
/// Reads from `input` and writes to `output`, which defaults to the same file.
#[derive(Clone, Debug)]
pub struct PngTerrain {
    input: PathBuf,
    output: PathBuf,
    pub vertical_scale: f32,
    pub horizontal_size: f32,
}

impl PngTerrain {
    pub fn new(path: impl AsRef<Path>, vertical_scale: f32, horizontal_size: f32) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            input: path.clone(),
            output: path,
            vertical_scale,
            horizontal_size,
        }
    }

    pub fn with_output(mut self, path: impl AsRef<Path>) -> Self {
        self.output = path.as_ref().to_path_buf();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

impl TerrainStore for PngTerrain {
    fn read_heights(&self) -> Result<HeightGrid> {
        let img = image::open(&self.input)?.into_luma16();
        let (width, height) = img.dimensions();
        debug!(path = %self.input.display(), width, height, "read heightmap");

        let data = img.pixels().map(|p| p.0[0] as f32 / u16::MAX as f32).collect();
        HeightGrid::from_vec(width as usize, height as usize, data)
    }

    fn write_heights(&mut self, grid: &HeightGrid) -> Result<()> {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(grid.width as u32, grid.height as u32, |x, y| {
                let h = grid.get(x as usize, y as usize).clamp(0.0, 1.0);
                Luma([(h * u16::MAX as f32).round() as u16])
            });
        img.save(&self.output)?;
        debug!(path = %self.output.display(), "wrote heightmap");
        Ok(())
    }

    fn vertical_scale(&self) -> f32 {
        self.vertical_scale
    }

    fn horizontal_size(&self) -> f32 {
        self.horizontal_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_png(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("terrain_erosion_{}_{}.png", name, std::process::id()))
    }

    #[test]
    fn test_memory_store_round_trip() {
        let grid = HeightGrid::from_fn(4, 3, |x, y| (x + y) as f32 * 0.1);
        let mut store = MemoryTerrain::new(HeightGrid::new_with(4, 3, 0.0), 50.0, 10.0);
        store.write_heights(&grid).unwrap();
        assert_eq!(store.read_heights().unwrap(), grid);
        assert_eq!(store.vertical_scale(), 50.0);
    }

    #[test]
    fn test_png_store_keeps_16_bit_precision() {
        let path = temp_png("precision");
        let grid = HeightGrid::from_fn(17, 9, |x, y| (x * 9 + y) as f32 / 160.0);
        let mut store = PngTerrain::new(&path, 100.0, 16.0);
        store.write_heights(&grid).unwrap();

        let back = store.read_heights().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((back.width, back.height), (17, 9));
        for ((_, _, a), (_, _, b)) in grid.iter().zip(back.iter()) {
            assert!((a - b).abs() <= 1.0 / 65535.0);
        }
    }

    #[test]
    fn test_png_store_clamps_out_of_range() {
        let path = temp_png("clamp");
        let grid = HeightGrid::from_vec(2, 1, vec![-0.5, 1.5]).unwrap();
        let mut store = PngTerrain::new(&path, 1.0, 1.0);
        store.write_heights(&grid).unwrap();
        let back = store.read_heights().unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.data(), &[0.0, 1.0]);
    }

    #[test]
    fn test_missing_png_is_an_error() {
        let store = PngTerrain::new(temp_png("missing_does_not_exist"), 1.0, 1.0);
        assert!(store.read_heights().is_err());
    }
}
