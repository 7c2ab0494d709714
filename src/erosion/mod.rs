//! Erosion simulation module
//!
//! Implements two droplet-based erosion techniques on a square simulation
//! grid resampled from the authoring heightmap:
//! - **Hydraulic erosion**: multi-pass droplet simulation, doubling droplet
//!   count and simulation resolution every pass
//! - **Wind erosion**: a single pass whose droplets drift along a wind vector,
//!   followed by two smoothing passes
//!
//! [`ErosionTools`] wires both, plus the post-processing filters, onto a
//! [`TerrainStore`].

pub mod brush;
pub mod executor;
pub mod gpu;
pub mod hydraulic;
pub mod params;
pub mod resample;
pub mod wind;

pub use brush::Brush;
pub use executor::{Executor, ExecutorKind};
pub use params::{ErosionParams, ErosionPreset, WindBias};
pub use resample::{downsample, upsample, SimulationGrid};
pub use wind::wind_erode;

use tracing::{debug, info};

use crate::config::ToolSettings;
use crate::error::{ErosionError, Result};
use crate::filters::{self, TerraceParams};
use crate::grid::HeightGrid;
use crate::terrain::TerrainStore;
use hydraulic::{DropletKernel, DropletOutcome};

/// Statistics from erosion simulation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErosionStats {
    /// Droplets launched, including discarded ones
    pub droplets: usize,
    /// Droplets that spawned outside the interior and did nothing
    pub discarded: usize,
    /// Total number of droplet steps taken
    pub steps_taken: u64,
    /// Total material eroded (in height units)
    pub total_eroded: f64,
    /// Total material deposited
    pub total_deposited: f64,
}

impl ErosionStats {
    pub fn record(&mut self, outcome: &DropletOutcome) {
        self.droplets += 1;
        if outcome.discarded {
            self.discarded += 1;
        }
        self.steps_taken += outcome.steps as u64;
        self.total_eroded += outcome.eroded as f64;
        self.total_deposited += outcome.deposited as f64;
    }

    pub fn merge(&mut self, other: &ErosionStats) {
        self.droplets += other.droplets;
        self.discarded += other.discarded;
        self.steps_taken += other.steps_taken;
        self.total_eroded += other.total_eroded;
        self.total_deposited += other.total_deposited;
    }
}

/// Simulation resolution and droplet count for every hydraulic pass.
///
/// Pass `i` runs `base_iterations * 2^i` droplets on a
/// `base_resolution * 2^i + 1` grid.
pub fn hydraulic_schedule(base_iterations: usize, base_resolution: usize, steps: u32) -> Result<Vec<(usize, usize)>> {
    (0..steps)
        .map(|i| {
            let factor = 1usize.checked_shl(i).filter(|f| f.leading_zeros() > 0);
            let pass = factor.and_then(|f| {
                let iterations = base_iterations.checked_mul(f)?;
                let resolution = base_resolution.checked_mul(f)?.checked_add(1)?;
                resolution.checked_mul(resolution)?;
                Some((resolution, iterations))
            });
            pass.ok_or_else(|| {
                ErosionError::invalid(format!(
                    "erosion pass {} overflows (base iterations {}, base resolution {})",
                    i, base_iterations, base_resolution
                ))
            })
        })
        .collect()
}

/// Multi-pass hydraulic erosion of `grid` in place.
///
/// Every pass downsamples the current grid, runs the droplets and blends the
/// result back. Pass `i` is seeded with `seed + i`. All arguments are checked
/// before the first pass; on error `grid` is untouched.
#[allow(clippy::too_many_arguments)]
pub fn hydraulic_erode(
    grid: &mut HeightGrid,
    base_iterations: usize,
    base_resolution: usize,
    steps: u32,
    params: &ErosionParams,
    brush_radius: i32,
    seed: u64,
    executor: &Executor,
) -> Result<ErosionStats> {
    params.validate()?;
    if grid.width < 2 || grid.height < 2 {
        return Err(ErosionError::invalid(format!(
            "heightmap must be at least 2x2, got {}x{}",
            grid.width, grid.height
        )));
    }
    let schedule = hydraulic_schedule(base_iterations, base_resolution, steps)?;

    // Every pass needs its own brush; build them all before touching the grid
    let brushes = schedule
        .iter()
        .map(|&(resolution, _)| {
            check_interior(resolution, brush_radius)?;
            Brush::build(brush_radius, resolution)
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        passes = schedule.len(),
        width = grid.width,
        height = grid.height,
        executor = %executor.kind(),
        "hydraulic erosion"
    );

    let mut stats = ErosionStats::default();
    for (pass, (&(resolution, iterations), brush)) in schedule.iter().zip(&brushes).enumerate() {
        let kernel = DropletKernel {
            resolution,
            brush,
            params,
            wind: None,
            seed: seed.wrapping_add(pass as u64),
        };

        let mut sim = downsample(grid, resolution)?;
        let pass_stats = executor.run(&mut sim, &kernel, iterations);
        *grid = upsample(&sim, std::mem::take(grid))?;

        info!(
            pass,
            resolution,
            droplets = iterations,
            discarded = pass_stats.discarded,
            eroded = pass_stats.total_eroded,
            "hydraulic pass complete"
        );
        stats.merge(&pass_stats);
    }

    debug!(?stats, "hydraulic erosion complete");
    Ok(stats)
}

/// Reject brushes that leave no room for a droplet to move.
pub(crate) fn check_interior(resolution: usize, brush_radius: i32) -> Result<()> {
    if resolution < 2 {
        return Err(ErosionError::invalid(format!(
            "simulation resolution must be at least 2, got {}",
            resolution
        )));
    }
    if brush_radius <= 0 {
        return Err(ErosionError::invalid(format!(
            "brush radius must be positive, got {}",
            brush_radius
        )));
    }
    if resolution <= 2 * brush_radius as usize + 2 {
        return Err(ErosionError::invalid(format!(
            "brush radius {} leaves no interior on a {}x{} simulation grid",
            brush_radius, resolution, resolution
        )));
    }
    Ok(())
}

// =============================================================================
// TOOLS FACADE
// =============================================================================

/// The erosion tool buttons: read the terrain, transform it, write it back.
pub struct ErosionTools {
    pub settings: ToolSettings,
    executor: Executor,
}

impl ErosionTools {
    /// Validate `settings` and pick the executor it asks for.
    pub fn new(settings: ToolSettings) -> Result<Self> {
        settings.validate()?;
        let executor = Executor::new(settings.executor);
        Ok(Self { settings, executor })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn hydraulic_erode(&self, store: &mut dyn TerrainStore) -> Result<ErosionStats> {
        let s = &self.settings;
        let mut grid = store.read_heights()?;
        let stats = hydraulic_erode(
            &mut grid,
            s.hydraulic.iterations,
            s.hydraulic.resolution,
            s.hydraulic.steps,
            &s.hydraulic.params,
            s.brush_radius,
            s.seed,
            &self.executor,
        )?;
        store.write_heights(&grid)?;
        Ok(stats)
    }

    pub fn wind_erode(&self, store: &mut dyn TerrainStore) -> Result<ErosionStats> {
        let s = &self.settings;
        let mut grid = store.read_heights()?;
        let stats = wind_erode(
            &mut grid,
            s.wind.windiness,
            (s.wind.direction[0], s.wind.direction[1]),
            s.wind.resolution,
            s.wind.base_iterations,
            &s.wind.params,
            s.brush_radius,
            s.seed,
            &self.executor,
        )?;
        store.write_heights(&grid)?;
        Ok(stats)
    }

    pub fn terrace(&self, store: &mut dyn TerrainStore) -> Result<()> {
        let params = TerraceParams {
            spacing: self.settings.terrace.spacing,
            angle_deg: self.settings.terrace.angle_deg,
            vertical_scale: store.vertical_scale(),
            horizontal_size: store.horizontal_size(),
        };
        let grid = store.read_heights()?;
        let out = filters::terrace(&grid, &params)?;
        store.write_heights(&out)
    }

    pub fn smooth(&self, store: &mut dyn TerrainStore) -> Result<()> {
        let grid = store.read_heights()?;
        let out = filters::smooth(&grid, self.settings.smoothing_width);
        store.write_heights(&out)
    }

    pub fn sharpen(&self, store: &mut dyn TerrainStore) -> Result<()> {
        let grid = store.read_heights()?;
        let out = filters::sharpen(&grid, &self.settings.sharpen)?;
        store.write_heights(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::MemoryTerrain;

    fn standard() -> ErosionParams {
        ErosionParams::from_preset(ErosionPreset::Standard)
    }

    fn rippled(size: usize) -> HeightGrid {
        HeightGrid::from_fn(size, size, |x, y| {
            0.5 + 0.02 * ((x as f32 * 0.7).sin() * (y as f32 * 0.5).cos())
        })
    }

    #[test]
    fn test_schedule_doubles_each_pass() {
        let schedule = hydraulic_schedule(1000, 64, 3).unwrap();
        assert_eq!(schedule, vec![(65, 1000), (129, 2000), (257, 4000)]);
        assert!(hydraulic_schedule(1000, 64, 0).unwrap().is_empty());
    }

    #[test]
    fn test_schedule_overflow_rejected() {
        assert!(hydraulic_schedule(usize::MAX / 2, 64, 4).is_err());
        assert!(hydraulic_schedule(1, 64, 70).is_err());
    }

    #[test]
    fn test_flat_grid_end_to_end() {
        let mut grid = HeightGrid::new_with(65, 65, 0.5);
        let before = grid.sum();
        hydraulic_erode(&mut grid, 1000, 64, 1, &standard(), 2, 42, &Executor::Serial).unwrap();

        assert!(grid.data().iter().all(|&h| (0.0..=1.0).contains(&h)));
        assert!((grid.sum() - before).abs() / before < 0.01);
        // Zero slope means zero erosion: the flat grid comes back unchanged
        assert!(grid.data().iter().all(|&h| h == 0.5));
    }

    #[test]
    fn test_rippled_grid_end_to_end() {
        let mut grid = rippled(65);
        let before_sum = grid.sum();
        let before_var = grid.variance();
        let stats = hydraulic_erode(&mut grid, 1000, 64, 1, &standard(), 2, 42, &Executor::Serial).unwrap();

        assert_eq!(stats.droplets, 1000);
        assert!(stats.total_eroded > 0.0);
        assert!(grid.data().iter().all(|&h| (0.0..=1.0).contains(&h)));
        assert!((grid.sum() - before_sum).abs() / before_sum < 0.01);
        assert!((grid.variance() - before_var).abs() > 0.0);
    }

    #[test]
    fn test_parallel_end_to_end_stays_bounded() {
        let mut grid = rippled(65);
        let before_sum = grid.sum();
        hydraulic_erode(&mut grid, 500, 32, 2, &standard(), 2, 7, &Executor::Parallel).unwrap();
        assert!(grid.all_finite());
        assert!((grid.sum() - before_sum).abs() / before_sum < 0.02);
    }

    #[test]
    fn test_invalid_configuration_leaves_grid_untouched() {
        let original = rippled(33);

        let mut grid = original.clone();
        assert!(hydraulic_erode(&mut grid, 100, 64, 1, &standard(), 0, 1, &Executor::Serial).is_err());
        assert_eq!(grid, original);

        // Radius 3 needs more than an 8-cell interior
        assert!(hydraulic_erode(&mut grid, 100, 4, 1, &standard(), 3, 1, &Executor::Serial).is_err());
        assert_eq!(grid, original);

        let bad = ErosionParams {
            evaporate_speed: -0.5,
            ..standard()
        };
        assert!(matches!(
            hydraulic_erode(&mut grid, 100, 64, 1, &bad, 2, 1, &Executor::Serial),
            Err(ErosionError::InvalidConfiguration(_))
        ));
        assert_eq!(grid, original);
    }

    #[test]
    fn test_zero_steps_is_identity() {
        let mut grid = rippled(33);
        let before = grid.clone();
        let stats = hydraulic_erode(&mut grid, 1000, 64, 0, &standard(), 2, 1, &Executor::Serial).unwrap();
        assert_eq!(grid, before);
        assert_eq!(stats, ErosionStats::default());
    }

    #[test]
    fn test_stats_merge() {
        let mut a = ErosionStats::default();
        a.record(&DropletOutcome {
            steps: 4,
            eroded: 0.5,
            deposited: 0.25,
            discarded: false,
        });
        let mut b = ErosionStats::default();
        b.record(&DropletOutcome {
            discarded: true,
            ..DropletOutcome::default()
        });
        a.merge(&b);
        assert_eq!(a.droplets, 2);
        assert_eq!(a.discarded, 1);
        assert_eq!(a.steps_taken, 4);
        assert!((a.total_eroded - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_tools_write_back_to_store() {
        let mut settings = ToolSettings::default();
        settings.executor = ExecutorKind::Serial;
        settings.hydraulic.iterations = 500;
        settings.hydraulic.resolution = 32;
        settings.hydraulic.steps = 1;
        let tools = ErosionTools::new(settings).unwrap();

        let mut store = MemoryTerrain::new(rippled(33), 100.0, 33.0);
        let before = store.grid().clone();
        let stats = tools.hydraulic_erode(&mut store).unwrap();
        assert_eq!(stats.droplets, 500);
        assert_ne!(store.grid(), &before);

        tools.smooth(&mut store).unwrap();
        tools.sharpen(&mut store).unwrap();
        tools.terrace(&mut store).unwrap();
        assert!(store.grid().all_finite());
        assert_eq!(store.grid().width, 33);
    }

    #[test]
    fn test_tools_reject_invalid_settings() {
        let mut settings = ToolSettings::default();
        settings.hydraulic.steps = 9;
        assert!(ErosionTools::new(settings).is_err());
    }
}
