//! Demo binary: captures a synthetic scrollable document end to end and
//! writes the stitched tiles plus manifest to a directory.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::LevelFilter;

use pagecap::surface::{ruled_document, SyntheticSurface};
use pagecap::{CaptureConfig, CaptureOptions, DirStore, Orchestrator, TileCaps};

#[derive(Parser, Debug)]
#[command(name = "pagecap")]
#[command(about = "Capture a synthetic scrollable page into stitched PNG tiles")]
struct Args {
    /// Document width in CSS pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Document height in CSS pixels
    #[arg(long, default_value_t = 4000)]
    height: u32,

    /// Viewport width in CSS pixels
    #[arg(long, default_value_t = 1024)]
    viewport_width: u32,

    /// Viewport height in CSS pixels
    #[arg(long, default_value_t = 800)]
    viewport_height: u32,

    /// Device pixel ratio of the synthetic display
    #[arg(long, default_value_t = 1.0)]
    dpr: f64,

    /// Output directory
    #[arg(short, long, default_value = "captures")]
    out: PathBuf,

    /// Base name for stored artifacts
    #[arg(long, default_value = "capture")]
    base: String,

    /// Maximum tile width and height in device pixels
    #[arg(long, default_value_t = 15_000)]
    max_tile_extent: u32,

    /// Maximum tile area in device pixels
    #[arg(long, default_value_t = 60_000_000)]
    max_tile_area: u64,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let device_width = (args.width as f64 * args.dpr).round() as u32;
    let device_height = (args.height as f64 * args.dpr).round() as u32;
    let surface = Arc::new(
        SyntheticSurface::new(
            ruled_document(device_width, device_height),
            args.viewport_width,
            args.viewport_height,
        )
        .with_dpr(args.dpr),
    );

    let config = CaptureConfig {
        tile_caps: TileCaps {
            max_width: args.max_tile_extent,
            max_height: args.max_tile_extent,
            max_area: args.max_tile_area,
        },
        ..CaptureConfig::default()
    };
    let orchestrator = Orchestrator::new(config)?;
    let store = DirStore::new(&args.out);

    let opts = CaptureOptions {
        on_progress: Some(Arc::new(|p| println!("  progress {:>5.1}%", p * 100.0))),
        on_split: Some(Arc::new(|tiles| println!("  output split into {tiles} tiles"))),
        base_name: args.base.clone(),
        ..CaptureOptions::default()
    };

    println!(
        "capturing a {}x{} document through a {}x{} viewport (dpr {})",
        args.width, args.height, args.viewport_width, args.viewport_height, args.dpr
    );
    let artifacts = orchestrator.start_capture(surface, &store, &opts).await?;

    println!("stored {} image(s):", artifacts.images.len());
    for image in &artifacts.images {
        println!("  {}", image.0);
    }
    println!("open {} to view the stitched page", artifacts.manifest.0);
    Ok(())
}
