//! Profiling tool comparing erosion executors and filter costs

use std::time::{Duration, Instant};

use terrain_erosion::{
    erosion::{self, gpu, Executor},
    filters::{self, SharpenParams, TerraceParams},
    heightmap::{self, NoiseSettings},
    ErosionParams, ErosionPreset, ExecutorKind, HeightGrid,
};

fn main() {
    let size = 513;
    let seed = 1337u64;
    let iterations = 50_000;
    let base_resolution = 128;
    let steps = 2;

    println!("=== Erosion Profiling ===");
    println!("Map size: {}x{} ({} cells)", size, size, size * size);
    println!("Hydraulic: {} droplets at {}+1, {} steps", iterations, base_resolution, steps);
    if gpu::is_gpu_available() {
        println!("GPU adapter available");
    } else {
        println!("No GPU adapter, the gpu row falls back to parallel");
    }
    println!();

    let start = Instant::now();
    let noise = NoiseSettings { seed, ..Default::default() };
    let base = match heightmap::generate_heightmap(size, size, &noise, true) {
        Ok(grid) => grid,
        Err(err) => {
            eprintln!("Heightmap generation failed: {}", err);
            return;
        }
    };
    println!("Heightmap generation: {:?}", start.elapsed());

    let params = ErosionParams::from_preset(ErosionPreset::Standard);
    let mut timings: Vec<(String, Duration)> = Vec::new();

    for kind in [ExecutorKind::Serial, ExecutorKind::Parallel, ExecutorKind::Gpu] {
        let executor = Executor::new(kind);
        let mut grid = base.clone();
        let start = Instant::now();
        match erosion::hydraulic_erode(&mut grid, iterations, base_resolution, steps, &params, 2, seed, &executor) {
            Ok(stats) => {
                let elapsed = start.elapsed();
                println!(
                    "Hydraulic ({} -> {}): {:?}  eroded {:.2}, deposited {:.2}, {} discarded",
                    kind,
                    executor.kind(),
                    elapsed,
                    stats.total_eroded,
                    stats.total_deposited,
                    stats.discarded
                );
                report_mass(&base, &grid);
                timings.push((format!("hydraulic/{}", kind), elapsed));
            }
            Err(err) => println!("Hydraulic ({}) failed: {}", kind, err),
        }
    }

    let executor = Executor::new(ExecutorKind::Parallel);
    let mut grid = base.clone();
    let start = Instant::now();
    if let Err(err) = erosion::wind_erode(&mut grid, 0.5, (1.0, 2.0), 257, 200_000, &params, 2, seed, &executor) {
        println!("Wind erosion failed: {}", err);
    }
    timings.push(("wind/parallel".to_string(), start.elapsed()));

    let start = Instant::now();
    let _ = filters::smooth(&base, 2);
    timings.push(("smooth(2)".to_string(), start.elapsed()));

    let start = Instant::now();
    let sharpen = SharpenParams {
        strength: 5.0,
        peak_mix: 0.7,
        iterations: 10,
    };
    if let Err(err) = filters::sharpen(&base, &sharpen) {
        println!("Sharpen failed: {}", err);
    }
    timings.push(("sharpen x10".to_string(), start.elapsed()));

    let start = Instant::now();
    let terrace = TerraceParams {
        spacing: 15.0,
        angle_deg: 20.0,
        vertical_scale: 100.0,
        horizontal_size: 1000.0,
    };
    if let Err(err) = filters::terrace(&base, &terrace) {
        println!("Terrace failed: {}", err);
    }
    timings.push(("terrace".to_string(), start.elapsed()));

    let total: Duration = timings.iter().map(|(_, t)| *t).sum();
    println!("\n=== Summary ===");
    for (name, time) in &timings {
        println!(
            "{:<20} {:>8.2}% ({:?})",
            name,
            100.0 * time.as_secs_f64() / total.as_secs_f64(),
            time
        );
    }
    println!("─────────────────────────────────");
    println!("{:<20} {:>8}  {:?}", "TOTAL", "100%", total);
}

fn report_mass(before: &HeightGrid, after: &HeightGrid) {
    let b = before.sum();
    let a = after.sum();
    println!("  Mass: {:.2} -> {:.2} ({:+.3}%)", b, a, 100.0 * (a - b) / b);
}
