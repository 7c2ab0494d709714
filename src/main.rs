//! Command-line front end: generates heightmaps and runs one erosion or
//! filter tool over a 16-bit PNG.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::Level;

use terrain_erosion::heightmap::{self, NoiseSettings};
use terrain_erosion::{ErosionStats, ErosionTools, ExecutorKind, PngTerrain, Result, TerrainStore, ToolSettings};

#[derive(Parser, Debug)]
#[command(name = "terrain_erosion")]
#[command(about = "Erode, weather and terrace heightmaps stored as 16-bit PNGs")]
struct Args {
    /// JSON tool settings; fields left out keep their defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Random seed (overrides the config)
    #[arg(short, long, global = true)]
    seed: Option<u64>,

    /// Droplet executor (overrides the config)
    #[arg(short, long, global = true, value_enum)]
    executor: Option<ExecutorKind>,

    /// World height of a white pixel
    #[arg(long, global = true, default_value = "100")]
    vertical_scale: f32,

    /// World width of the heightmap
    #[arg(long, global = true, default_value = "1000")]
    horizontal_size: f32,

    /// Log simulation details
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a fractal noise heightmap
    Generate {
        output: PathBuf,
        #[arg(short = 'W', long, default_value = "513")]
        width: usize,
        #[arg(short = 'H', long, default_value = "513")]
        height: usize,
        /// Sink the borders to zero
        #[arg(long)]
        falloff: bool,
    },
    /// Multi-pass hydraulic erosion
    Hydraulic(Io),
    /// Wind-biased erosion followed by smoothing
    Wind(Io),
    /// Snap gentle slopes into height bands
    Terrace(Io),
    /// Box blur
    Smooth(Io),
    /// Peak-preserving unsharp mask
    Sharpen(Io),
}

#[derive(clap::Args, Debug)]
struct Io {
    /// Heightmap to read
    input: PathBuf,
    /// Where to write the result (defaults to overwriting the input)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut settings = match &args.config {
        Some(path) => ToolSettings::load(path)?,
        None => ToolSettings::default(),
    };
    if let Some(seed) = args.seed {
        settings.seed = seed;
    }
    if let Some(executor) = args.executor {
        settings.executor = executor;
    }

    let io = match &args.command {
        Command::Generate { output, width, height, falloff } => {
            return generate(output, *width, *height, *falloff, settings.seed, &args);
        }
        Command::Hydraulic(io) | Command::Wind(io) | Command::Terrace(io) | Command::Smooth(io) | Command::Sharpen(io) => io,
    };

    let tools = ErosionTools::new(settings)?;
    println!("Using {} executor", tools.executor().kind());
    let mut store = open(io, &args);

    let start = Instant::now();
    match &args.command {
        Command::Hydraulic(_) => {
            println!("Hydraulic erosion...");
            print_stats(&tools.hydraulic_erode(&mut store)?);
        }
        Command::Wind(_) => {
            println!("Wind erosion...");
            print_stats(&tools.wind_erode(&mut store)?);
        }
        Command::Terrace(_) => tools.terrace(&mut store)?,
        Command::Smooth(_) => tools.smooth(&mut store)?,
        Command::Sharpen(_) => tools.sharpen(&mut store)?,
        Command::Generate { .. } => {}
    }
    println!("Saved: {} ({:?})", store.output().display(), start.elapsed());
    Ok(())
}

fn generate(output: &Path, width: usize, height: usize, falloff: bool, seed: u64, args: &Args) -> Result<()> {
    let noise = NoiseSettings {
        seed,
        ..Default::default()
    };
    println!("Generating {}x{} heightmap with seed: {}", width, height, seed);
    let grid = heightmap::generate_heightmap(width, height, &noise, falloff)?;
    let mut store = PngTerrain::new(output, args.vertical_scale, args.horizontal_size);
    store.write_heights(&grid)?;
    println!("Saved heightmap: {}", output.display());
    Ok(())
}

fn open(io: &Io, args: &Args) -> PngTerrain {
    let store = PngTerrain::new(&io.input, args.vertical_scale, args.horizontal_size);
    match &io.output {
        Some(output) => store.with_output(output),
        None => store,
    }
}

fn print_stats(stats: &ErosionStats) {
    println!("  Droplets: {} ({} discarded)", stats.droplets, stats.discarded);
    println!("  Steps: {}", stats.steps_taken);
    println!("  Eroded: {:.3} units", stats.total_eroded);
    println!("  Deposited: {:.3} units", stats.total_deposited);
}
