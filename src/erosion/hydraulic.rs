//! Hydraulic erosion simulation using particle-based water droplets.
//!
//! Each droplet follows the terrain gradient, picking up sediment while it
//! has spare capacity and moves downhill, and dropping it when it slows,
//! climbs, or overflows. Droplets are independent: the only shared state is
//! the height buffer, reached through [`HeightField`] so the same kernel runs
//! against a plain slice (serial) or an atomic buffer (parallel).

use std::sync::atomic::{AtomicU32, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::erosion::brush::Brush;
use crate::erosion::params::{ErosionParams, WindBias};
use crate::erosion::resample::{lerp, SimulationGrid};
use crate::erosion::ErosionStats;

/// Water volume below which a droplet is considered evaporated.
pub(crate) const NEGLIGIBLE_WATER: f32 = 1e-4;

/// Height buffer access used by the droplet kernel.
pub trait HeightField {
    fn height(&self, idx: usize) -> f32;

    /// Add `amount` to a cell.
    fn add(&mut self, idx: usize, amount: f32);

    /// Remove up to `amount` from a cell without taking it below zero.
    /// Returns the material actually removed.
    fn take(&mut self, idx: usize, amount: f32) -> f32;
}

impl HeightField for [f32] {
    #[inline]
    fn height(&self, idx: usize) -> f32 {
        self[idx]
    }

    #[inline]
    fn add(&mut self, idx: usize, amount: f32) {
        self[idx] += amount;
    }

    #[inline]
    fn take(&mut self, idx: usize, amount: f32) -> f32 {
        let current = self[idx];
        let next = current - amount.min(current.max(0.0));
        self[idx] = next;
        current - next
    }
}

/// Shared height buffer with lock-free float accumulation.
///
/// Heights are stored as raw `f32` bits; concurrent contributions combine
/// through compare-and-swap, so the result depends on droplet order only
/// through float rounding.
pub struct AtomicHeights {
    cells: Vec<AtomicU32>,
}

impl AtomicHeights {
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            cells: data.iter().map(|h| AtomicU32::new(h.to_bits())).collect(),
        }
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.cells
            .into_iter()
            .map(|c| f32::from_bits(c.into_inner()))
            .collect()
    }

    #[inline]
    fn update(&self, idx: usize, f: impl Fn(f32) -> f32) -> (f32, f32) {
        let cell = &self.cells[idx];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let old = f32::from_bits(current);
            let new = f(old);
            match cell.compare_exchange_weak(current, new.to_bits(), Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return (old, new),
                Err(actual) => current = actual,
            }
        }
    }
}

impl HeightField for &AtomicHeights {
    #[inline]
    fn height(&self, idx: usize) -> f32 {
        f32::from_bits(self.cells[idx].load(Ordering::Relaxed))
    }

    #[inline]
    fn add(&mut self, idx: usize, amount: f32) {
        self.update(idx, |h| h + amount);
    }

    #[inline]
    fn take(&mut self, idx: usize, amount: f32) -> f32 {
        let (old, new) = self.update(idx, |h| h - amount.min(h.max(0.0)));
        old - new
    }
}

/// A water droplet for hydraulic erosion simulation
#[derive(Clone, Debug)]
pub struct Droplet {
    pub x: f32,
    pub y: f32,
    pub dir_x: f32,
    pub dir_y: f32,
    pub speed: f32,
    pub water: f32,
    pub sediment: f32,
}

impl Droplet {
    pub fn new(x: f32, y: f32, params: &ErosionParams) -> Self {
        Self {
            x,
            y,
            dir_x: 0.0,
            dir_y: 0.0,
            speed: params.initial_speed,
            water: params.initial_water_volume,
            sediment: 0.0,
        }
    }
}

/// What one droplet did to the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DropletOutcome {
    pub steps: u32,
    pub eroded: f32,
    pub deposited: f32,
    /// Spawned outside the interior and never touched the grid
    pub discarded: bool,
}

/// Sediment exchanged by a single droplet step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub delta_height: f32,
    /// Carry capacity at the new position
    pub capacity: f32,
    pub eroded: f32,
    pub deposited: f32,
}

/// Everything a droplet needs besides its height buffer.
#[derive(Clone, Copy)]
pub struct DropletKernel<'a> {
    pub resolution: usize,
    pub brush: &'a Brush,
    pub params: &'a ErosionParams,
    pub wind: Option<WindBias>,
    pub seed: u64,
}

impl<'a> DropletKernel<'a> {
    /// Droplet RNG: one ChaCha stream per droplet index.
    pub fn rng_for(&self, index: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(index as u64);
        rng
    }

    /// Spawn cell for droplet `index`, drawn from `[radius, resolution + radius)`.
    pub fn spawn_cell(&self, rng: &mut ChaCha8Rng) -> (usize, usize) {
        let border = self.brush.radius as usize;
        let x = rng.gen_range(border..self.resolution + border);
        let y = rng.gen_range(border..self.resolution + border);
        (x, y)
    }

    /// True while the brush and the bilinear neighbours fit around `(x, y)`.
    #[inline]
    pub(crate) fn in_interior(&self, x: f32, y: f32) -> bool {
        let border = self.brush.radius as f32;
        let limit = (self.resolution - 1) as f32 - border;
        x >= border && x < limit && y >= border && y < limit
    }

    /// Simulate droplet `index` against `field`.
    pub fn run<F: HeightField + ?Sized>(&self, field: &mut F, index: usize) -> DropletOutcome {
        let mut rng = self.rng_for(index);
        let (spawn_x, spawn_y) = self.spawn_cell(&mut rng);
        let mut outcome = DropletOutcome::default();

        if !self.in_interior(spawn_x as f32, spawn_y as f32) {
            outcome.discarded = true;
            return outcome;
        }

        let mut droplet = Droplet::new(spawn_x as f32, spawn_y as f32, self.params);
        let mut alive_inside = true;

        for _ in 0..self.params.max_droplet_lifetime {
            outcome.steps += 1;
            match self.step(field, &mut droplet, &mut rng) {
                Some(step) => {
                    outcome.eroded += step.eroded;
                    outcome.deposited += step.deposited;
                }
                None => {
                    alive_inside = false;
                    break;
                }
            }
            if droplet.water < NEGLIGIBLE_WATER {
                break;
            }
        }

        // Sediment still in suspension settles where the droplet stopped
        if alive_inside && droplet.sediment > 0.0 {
            let node_x = droplet.x as usize;
            let node_y = droplet.y as usize;
            let node = node_y * self.resolution + node_x;
            deposit_bilinear(field, self.resolution, node, droplet.x - node_x as f32, droplet.y - node_y as f32, droplet.sediment);
            outcome.deposited += droplet.sediment;
        }

        outcome
    }

    /// Move `droplet` one cell and trade sediment with the cell it left.
    ///
    /// Returns `None` once the droplet leaves the interior or samples a
    /// non-finite height; its sediment is lost with it.
    pub fn step<F: HeightField + ?Sized>(&self, field: &mut F, droplet: &mut Droplet, rng: &mut ChaCha8Rng) -> Option<Step> {
        let params = self.params;
        let size = self.resolution;
        let node_x = droplet.x as usize;
        let node_y = droplet.y as usize;
        let node = node_y * size + node_x;
        let off_x = droplet.x - node_x as f32;
        let off_y = droplet.y - node_y as f32;

        let (old_height, grad_x, grad_y) = height_and_gradient(field, size, droplet.x, droplet.y);

        droplet.dir_x = droplet.dir_x * params.inertia - grad_x * (1.0 - params.inertia);
        droplet.dir_y = droplet.dir_y * params.inertia - grad_y * (1.0 - params.inertia);
        normalize_or_random(&mut droplet.dir_x, &mut droplet.dir_y, rng);

        if let Some(wind) = self.wind {
            droplet.dir_x = droplet.dir_x * (1.0 - wind.weight) + wind.dir_x * wind.weight;
            droplet.dir_y = droplet.dir_y * (1.0 - wind.weight) + wind.dir_y * wind.weight;
            normalize_or_random(&mut droplet.dir_x, &mut droplet.dir_y, rng);
        }

        droplet.x += droplet.dir_x;
        droplet.y += droplet.dir_y;

        if !self.in_interior(droplet.x, droplet.y) {
            return None;
        }

        let (new_height, _, _) = height_and_gradient(field, size, droplet.x, droplet.y);
        let delta_height = new_height - old_height;
        if !delta_height.is_finite() {
            return None;
        }

        let capacity = (-delta_height * droplet.speed * droplet.water * params.sediment_capacity_factor)
            .max(params.min_sediment_capacity);
        let mut step = Step {
            delta_height,
            capacity,
            eroded: 0.0,
            deposited: 0.0,
        };

        if droplet.sediment > capacity || delta_height > 0.0 {
            let amount = if delta_height > 0.0 {
                // Climbing: fill the cell behind, at most with what is carried
                delta_height.min(droplet.sediment)
            } else {
                (droplet.sediment - capacity) * params.deposit_speed
            };
            droplet.sediment -= amount;
            deposit_bilinear(field, size, node, off_x, off_y, amount);
            step.deposited = amount;
        } else {
            let amount = ((capacity - droplet.sediment) * params.erode_speed).min(-delta_height);
            let mut removed = 0.0;
            for (offset, weight) in self.brush.iter() {
                let idx = (node as isize + offset as isize) as usize;
                removed += field.take(idx, amount * weight);
            }
            droplet.sediment += removed;
            step.eroded = removed;
        }

        droplet.speed = (droplet.speed * droplet.speed + delta_height * params.gravity).max(0.0).sqrt();
        droplet.water *= 1.0 - params.evaporate_speed;

        Some(step)
    }
}

/// Bilinear height and gradient at a fractional position.
///
/// Uses nested `a + (b - a) * t` blends so a constant neighbourhood samples
/// exactly.
#[inline]
pub fn height_and_gradient<F: HeightField + ?Sized>(field: &F, size: usize, x: f32, y: f32) -> (f32, f32, f32) {
    let node_x = x as usize;
    let node_y = y as usize;
    let fx = x - node_x as f32;
    let fy = y - node_y as f32;
    let idx = node_y * size + node_x;

    let nw = field.height(idx);
    let ne = field.height(idx + 1);
    let sw = field.height(idx + size);
    let se = field.height(idx + size + 1);

    let grad_x = (ne - nw) * (1.0 - fy) + (se - sw) * fy;
    let grad_y = (sw - nw) * (1.0 - fx) + (se - ne) * fx;
    let height = lerp(lerp(nw, ne, fx), lerp(sw, se, fx), fy);

    (height, grad_x, grad_y)
}

#[inline]
fn normalize_or_random(dx: &mut f32, dy: &mut f32, rng: &mut ChaCha8Rng) {
    let len = (*dx * *dx + *dy * *dy).sqrt();
    if len > 1e-6 && len.is_finite() {
        *dx /= len;
        *dy /= len;
    } else {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        *dx = angle.cos();
        *dy = angle.sin();
    }
}

#[inline]
fn deposit_bilinear<F: HeightField + ?Sized>(field: &mut F, size: usize, node: usize, off_x: f32, off_y: f32, amount: f32) {
    field.add(node, amount * (1.0 - off_x) * (1.0 - off_y));
    field.add(node + 1, amount * off_x * (1.0 - off_y));
    field.add(node + size, amount * (1.0 - off_x) * off_y);
    field.add(node + size + 1, amount * off_x * off_y);
}

/// Reference path: simulate `num_droplets` droplets in index order.
pub fn simulate(grid: &mut SimulationGrid, kernel: &DropletKernel<'_>, num_droplets: usize) -> ErosionStats {
    let mut stats = ErosionStats::default();
    let field = grid.data.as_mut_slice();
    for index in 0..num_droplets {
        stats.record(&kernel.run(&mut *field, index));
    }
    stats
}

/// Parallel path: droplets run on the rayon pool against an atomic buffer.
pub fn simulate_parallel(grid: &mut SimulationGrid, kernel: &DropletKernel<'_>, num_droplets: usize) -> ErosionStats {
    use rayon::prelude::*;

    let heights = AtomicHeights::from_slice(&grid.data);
    let stats = (0..num_droplets)
        .into_par_iter()
        .fold(ErosionStats::default, |mut stats, index| {
            let mut field = &heights;
            stats.record(&kernel.run(&mut field, index));
            stats
        })
        .reduce(ErosionStats::default, |mut a, b| {
            a.merge(&b);
            a
        });

    grid.data = heights.into_vec();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erosion::params::ErosionPreset;

    fn sloped(res: usize) -> SimulationGrid {
        let mut grid = SimulationGrid::new_with(res, 0.0);
        for y in 0..res {
            for x in 0..res {
                // High at the top-left corner, low at the bottom-right
                let h = 1.0 - (x + y) as f32 / (2 * res) as f32;
                grid.data[y * res + x] = h + 0.01 * ((x * 7 + y * 13) % 5) as f32;
            }
        }
        grid
    }

    fn kernel<'a>(brush: &'a Brush, params: &'a ErosionParams, res: usize) -> DropletKernel<'a> {
        DropletKernel {
            resolution: res,
            brush,
            params,
            wind: None,
            seed: 12345,
        }
    }

    #[test]
    fn test_zero_droplets_is_identity() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 32).unwrap();
        let mut grid = sloped(32);
        let before = grid.clone();
        let stats = simulate(&mut grid, &kernel(&brush, &params, 32), 0);
        assert_eq!(grid, before);
        assert_eq!(stats.droplets, 0);

        let stats = simulate_parallel(&mut grid, &kernel(&brush, &params, 32), 0);
        assert_eq!(grid, before);
        assert_eq!(stats.steps_taken, 0);
    }

    #[test]
    fn test_droplets_erode_slope() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 48).unwrap();
        let mut grid = sloped(48);
        let before = grid.clone();
        let stats = simulate(&mut grid, &kernel(&brush, &params, 48), 2000);

        assert!(stats.total_eroded > 0.0);
        assert!(stats.total_deposited > 0.0);
        assert!(stats.discarded > 0, "spawn range overlaps the far border");
        assert_ne!(grid, before);
        assert!(grid.data.iter().all(|h| h.is_finite() && *h >= 0.0));
    }

    #[test]
    fn test_flat_grid_is_fixed_point() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 33).unwrap();
        let mut grid = SimulationGrid::new_with(33, 0.5);
        simulate(&mut grid, &kernel(&brush, &params, 33), 500);
        assert!(grid.data.iter().all(|&h| h == 0.5));
    }

    #[test]
    fn test_single_droplet_mass_bounded_by_its_sediment() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 40).unwrap();
        let k = kernel(&brush, &params, 40);

        for index in 0..50 {
            let mut grid = sloped(40);
            let before = grid.sum();
            let outcome = k.run(grid.data.as_mut_slice(), index);
            let after = grid.sum();

            // Erosion removes, deposition returns; the net loss is at most
            // what the droplet picked up.
            assert!(outcome.eroded >= 0.0 && outcome.deposited >= 0.0);
            assert!(before - after <= outcome.eroded as f64 + 1e-4);
            assert!(after - before <= 1e-4);
        }
    }

    #[test]
    fn test_parallel_matches_serial_statistically() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 48).unwrap();
        let k = kernel(&brush, &params, 48);

        let mut serial = sloped(48);
        let mut parallel = serial.clone();
        let s = simulate(&mut serial, &k, 500);
        let p = simulate_parallel(&mut parallel, &k, 500);

        // Same spawns, same discards; the grids differ only through interleaving
        assert_eq!(s.droplets, p.droplets);
        assert_eq!(s.discarded, p.discarded);
        assert!(p.total_eroded > 0.5 * s.total_eroded && p.total_eroded < 2.0 * s.total_eroded);
        assert!(parallel.data.iter().all(|h| h.is_finite()));
    }

    #[test]
    fn test_atomic_take_never_goes_negative() {
        let heights = AtomicHeights::from_slice(&[0.2, 1.0]);
        let mut field = &heights;
        let removed = field.take(0, 0.5);
        assert!((removed - 0.2).abs() < 1e-6);
        field.add(1, 0.25);
        assert_eq!(heights.into_vec(), vec![0.0, 1.25]);
    }

    #[test]
    fn test_droplet_rng_is_per_index() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 64).unwrap();
        let k = kernel(&brush, &params, 64);
        let a = k.spawn_cell(&mut k.rng_for(7));
        let b = k.spawn_cell(&mut k.rng_for(7));
        assert_eq!(a, b);
        let (x, y) = a;
        assert!((2..66).contains(&x) && (2..66).contains(&y));
    }

    /// Linear ramp along x: `h(x) = start + slope * x`.
    fn ramp(res: usize, start: f32, slope: f32) -> SimulationGrid {
        let mut grid = SimulationGrid::new_with(res, 0.0);
        for y in 0..res {
            for x in 0..res {
                grid.data[y * res + x] = start + slope * x as f32;
            }
        }
        grid
    }

    fn heading_east(params: &ErosionParams, sediment: f32) -> Droplet {
        let mut droplet = Droplet::new(10.0, 10.0, params);
        droplet.dir_x = 1.0;
        droplet.sediment = sediment;
        droplet
    }

    #[test]
    fn test_downhill_step_erodes_at_most_erode_speed_times_capacity() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 32).unwrap();
        let k = kernel(&brush, &params, 32);
        let mut rng = k.rng_for(0);

        let mut grid = ramp(32, 0.8, -0.02);
        let before = grid.sum();
        let mut droplet = heading_east(&params, 0.03);
        let step = k.step(grid.data.as_mut_slice(), &mut droplet, &mut rng).unwrap();

        assert!((droplet.x - 11.0).abs() < 1e-6 && (droplet.y - 10.0).abs() < 1e-6);
        assert!((step.delta_height + 0.02).abs() < 1e-5);
        assert!((step.capacity - 0.08).abs() < 1e-4);
        assert_eq!(step.deposited, 0.0);
        // Free capacity 0.05 at erode speed 0.3
        assert!((step.eroded - 0.015).abs() < 1e-4);
        assert!(step.eroded <= params.erode_speed * step.capacity + 1e-6);
        assert!(step.eroded <= -step.delta_height + 1e-6);
        assert!((droplet.sediment - 0.045).abs() < 1e-4);
        assert!((before - grid.sum() - step.eroded as f64).abs() < 1e-4);
    }

    #[test]
    fn test_uphill_step_deposits_min_of_climb_and_sediment() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 32).unwrap();
        let k = kernel(&brush, &params, 32);

        for (sediment, expected) in [(0.5, 0.01), (0.004, 0.004)] {
            let mut rng = k.rng_for(0);
            let mut grid = ramp(32, 0.2, 0.01);
            let before = grid.sum();
            let mut droplet = heading_east(&params, sediment);
            let step = k.step(grid.data.as_mut_slice(), &mut droplet, &mut rng).unwrap();

            assert!(step.delta_height > 0.0);
            assert_eq!(step.eroded, 0.0);
            assert!(step.deposited >= 0.0);
            assert!((step.deposited - expected).abs() < 1e-5, "sediment {}", sediment);
            assert!((droplet.sediment - (sediment - expected)).abs() < 1e-5);
            // Spawned on a node, so the whole deposit lands on (10, 10)
            assert!((grid.get(10, 10) - (0.3 + expected)).abs() < 1e-5);
            assert!((grid.sum() - before - step.deposited as f64).abs() < 1e-4);
        }
    }

    #[test]
    fn test_step_off_the_interior_ends_droplet() {
        let params = ErosionParams::from_preset(ErosionPreset::Standard);
        let brush = Brush::build(2, 32).unwrap();
        let k = kernel(&brush, &params, 32);
        let mut rng = k.rng_for(0);

        let mut grid = ramp(32, 0.8, -0.02);
        let before = grid.clone();
        let mut droplet = Droplet::new(28.5, 10.0, &params);
        droplet.dir_x = 1.0;
        assert!(k.step(grid.data.as_mut_slice(), &mut droplet, &mut rng).is_none());
        assert_eq!(grid, before);
    }
}
