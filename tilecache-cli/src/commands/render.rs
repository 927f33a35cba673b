//! Render a tile through a tile manager.
//!
//! Uses a solid color source and in-memory storage, so the whole create
//! cycle (meta-tiling, locking, splitting, storing) can be tried without an
//! upstream service.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tilecache::config::ConfigFile;
use tilecache::coord::TileCoord;
use tilecache::manager::Watermark;
use tilecache::source::SolidSource;
use tilecache::srs::SrsRegistry;
use tracing::info;

use crate::error::CliError;

/// Arguments of the render command.
#[derive(Debug, Args)]
pub struct RenderArgs {
    x: i64,
    y: i64,
    z: u32,

    /// Output image file
    #[arg(long, short)]
    output: PathBuf,

    /// Source color as RRGGBB or RRGGBBAA hex
    #[arg(long, default_value = "a0c8f0", value_parser = parse_color)]
    color: [u8; 4],

    /// Stamp a watermark block of this many pixels
    #[arg(long)]
    watermark: Option<u32>,
}

/// Render one tile and write it to the output file.
pub fn run(args: RenderArgs, config: &ConfigFile, registry: &SrsRegistry) -> Result<(), CliError> {
    let grid = Arc::new(config.tile_grid(registry)?);
    let storage = config.memory_storage();
    let mut builder = config
        .manager_builder(grid, storage.clone())?
        .source(Arc::new(SolidSource::new("solid", args.color)));
    if let Some(size) = args.watermark {
        builder = builder.filter(Arc::new(Watermark {
            color: [255, 255, 255, 160],
            size,
        }));
    }
    let manager = builder.build()?;

    let coord = TileCoord::new(args.x, args.y, args.z);
    let mut tile = manager.load_tile(coord)?;
    let data = tile
        .source_buffer()
        .map_err(|e| CliError::Argument(format!("cannot encode tile {}: {}", coord, e)))?
        .ok_or_else(|| CliError::Argument(format!("tile {} is outside the source coverage", coord)))?;

    std::fs::write(&args.output, data).map_err(|error| CliError::FileWrite {
        path: args.output.display().to_string(),
        error,
    })?;

    let stats = storage.stats();
    info!(tile = %coord, stored = stats.entries, "Rendered tile");
    println!(
        "Wrote {} ({} tiles of its meta-tile stored)",
        args.output.display(),
        stats.entries
    );
    Ok(())
}

/// Parse `RRGGBB` or `RRGGBBAA`, with an optional leading `#`.
fn parse_color(s: &str) -> Result<[u8; 4], String> {
    let hex = s.trim_start_matches('#');
    if hex.len() != 6 && hex.len() != 8 {
        return Err(format!("expected RRGGBB or RRGGBBAA, got '{}'", s));
    }
    let mut color = [255u8; 4];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let part = std::str::from_utf8(chunk).map_err(|e| e.to_string())?;
        color[i] = u8::from_str_radix(part, 16).map_err(|_| format!("invalid hex color '{}'", s))?;
    }
    Ok(color)
}
