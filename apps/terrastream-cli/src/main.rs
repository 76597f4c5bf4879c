use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::DVec3;
use terrastream_common::{GridCoord, GridLayout, TileRecord};
use terrastream_persist::{TileStore, scan_directory};
use terrastream_stream::{
    ExecutionContext, ManualClock, MemoryHost, SceneHost, StreamConfig, StreamingContext,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terrastream-cli", about = "Developer harness for terrain tile streaming")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Discover tile resources in a directory
    Scan {
        /// Directory holding terrain_<x>_<z>.* style files
        #[arg(short, long)]
        dir: PathBuf,
        /// Edge length of one grid tile
        #[arg(short, long, default_value = "1000")]
        tile_size: f64,
        /// Save the discovered records to a tile store at this path
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Stream a grid of tiles against an in-memory host
    Simulate {
        /// YAML streaming configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Load tile records from a store instead of generating a grid
        #[arg(long)]
        store: Option<PathBuf>,
        /// Tiles per grid side when generating
        #[arg(short = 'n', long, default_value = "16")]
        tiles: i32,
        /// Edge length of one grid tile
        #[arg(short, long, default_value = "1000")]
        tile_size: f64,
        /// Number of viewer moves
        #[arg(short, long, default_value = "8")]
        steps: usize,
        /// Frames ticked after each move
        #[arg(long, default_value = "30")]
        frames: usize,
        /// Run in play mode, with throttled batches and runtime caching
        #[arg(long)]
        live: bool,
    },
}

fn generate_grid(layout: &GridLayout, side: i32) -> Vec<TileRecord> {
    let mut records = Vec::new();
    for x in 0..side {
        for z in 0..side {
            let name = format!("terrain_{x}_{z}");
            records.push(
                TileRecord::on_grid(name.clone(), layout, GridCoord::new(x, z), layout.tile_size(), name)
                    .with_impostor(format!("impostor_{x}_{z}")),
            );
        }
    }
    records
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("terrastream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", terrastream_stream::crate_info());
            println!("persist: {}", terrastream_persist::crate_info());
        }
        Commands::Scan { dir, tile_size, out } => {
            anyhow::ensure!(tile_size > 0.0, "tile size must be positive");
            let layout = GridLayout::new(tile_size, DVec3::ZERO);
            let records = scan_directory(&dir, &layout)
                .with_context(|| format!("scanning {}", dir.display()))?;
            println!("Found {} tiles in {}", records.len(), dir.display());
            for record in &records {
                println!(
                    "  {:<20} impostor={} collider={} backup={}",
                    record.name,
                    record.impostor.is_some(),
                    record.collider.is_some(),
                    record.backup.is_some()
                );
            }
            if let Some(out) = out {
                let mut store = TileStore::open(&out)?;
                store.save(&records)?;
                println!("Saved to {}", out.display());
            }
        }
        Commands::Simulate {
            config,
            store,
            tiles,
            tile_size,
            steps,
            frames,
            live,
        } => {
            anyhow::ensure!(tile_size > 0.0, "tile size must be positive");
            let config = match config {
                Some(path) => StreamConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => StreamConfig::default(),
            };
            let layout = GridLayout::new(tile_size, DVec3::ZERO);
            let records = match store {
                Some(path) => TileStore::open(&path)?.load()?,
                None => generate_grid(&layout, tiles),
            };

            let clock = ManualClock::new();
            let mut ctx = StreamingContext::new(config, MemoryHost::immediate(), clock.clone())
                .with_layout(layout);
            let mut rejected = 0;
            for record in records {
                if let Err(err) = ctx.register_tile(record) {
                    tracing::warn!(%err, "tile rejected");
                    rejected += 1;
                }
            }
            println!(
                "Simulating {} tiles ({rejected} rejected), {steps} steps, live={live}",
                ctx.registry().len()
            );

            if live {
                ctx.set_execution_context(ExecutionContext::Playing);
                ctx.initialize_runtime();
            }
            ctx.start_tracking_progress();

            let extent = tiles as f64 * tile_size;
            let frame = Duration::from_millis(16);
            for step in 0..steps {
                // Walk the viewer along the diagonal.
                let t = (step as f64 + 0.5) / steps.max(1) as f64;
                let center = DVec3::new(extent * t, 0.0, extent * t);
                ctx.set_loading_center(center);
                for _ in 0..frames {
                    clock.advance(frame);
                    ctx.tick(frame);
                }
                let stats = ctx.stats();
                let resident_mb = ctx.host().resident_memory_bytes().unwrap_or(0) / (1024 * 1024);
                println!(
                    "step {step:>3}: center=({:.0}, {:.0}) regular={} impostor={} queued={} resident={}MB progress={}",
                    center.x,
                    center.z,
                    stats.regular_loaded,
                    stats.impostor_loaded,
                    stats.queue_len,
                    resident_mb,
                    ctx.progress()
                        .and_then(|p| p.last_value())
                        .map_or_else(|| "-".to_string(), |v| format!("{:.0}%", v * 100.0)),
                );
            }
            println!(
                "avg tick {:?}, host loads {}, unloads {}",
                ctx.frame_timer().average(),
                ctx.host().load_calls().len(),
                ctx.host().unload_count()
            );
        }
    }

    Ok(())
}
