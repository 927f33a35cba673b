//! Grid inspection commands.

use std::sync::Arc;

use clap::Subcommand;
use tilecache::config::ConfigFile;
use tilecache::coord::{BBox, TileCoord};
use tilecache::grid::MetaGrid;
use tilecache::srs::SrsRegistry;

use crate::error::CliError;

/// Grid subcommands.
#[derive(Debug, Subcommand)]
pub enum GridAction {
    /// Show the configured grid: levels, resolutions and grid sizes
    Info,

    /// Find the tile containing a map coordinate
    Tile {
        /// X in grid SRS units
        #[arg(allow_hyphen_values = true)]
        x: f64,
        /// Y in grid SRS units
        #[arg(allow_hyphen_values = true)]
        y: f64,
        /// Level
        level: u32,
    },

    /// List the tiles needed to answer a map request
    Affected {
        /// Request bbox as minx,miny,maxx,maxy
        #[arg(allow_hyphen_values = true)]
        bbox: BBox,
        /// Request size in pixels (e.g. 512x512)
        #[arg(long, default_value = "256x256", value_parser = super::parse_size)]
        size: (u32, u32),
        /// SRS of the request bbox (defaults to the grid SRS)
        #[arg(long)]
        srs: Option<String>,
    },

    /// Show the meta-tile containing a tile
    Meta {
        x: i64,
        y: i64,
        z: u32,
    },
}

/// Run a grid subcommand.
pub fn run(action: GridAction, config: &ConfigFile, registry: &SrsRegistry) -> Result<(), CliError> {
    let grid = Arc::new(config.tile_grid(registry)?);

    match action {
        GridAction::Info => {
            println!("Grid: {}", grid.identity());
            println!("  SRS:       {}", grid.srs());
            println!("  BBox:      {}", grid.bbox());
            println!("  Origin:    {}", grid.origin());
            println!("  Tile size: {}x{}", grid.tile_size().0, grid.tile_size().1);
            println!();
            println!("  {:>5}  {:>20}  {:>15}", "level", "resolution", "tiles");
            for (level, (res, size)) in grid
                .resolutions()
                .iter()
                .zip(grid.grid_sizes())
                .enumerate()
            {
                println!(
                    "  {:>5}  {:>20.10}  {:>15}",
                    level,
                    res,
                    format!("{}x{}", size.0, size.1)
                );
            }
        }
        GridAction::Tile { x, y, level } => {
            let coord = grid.tile(x, y, level)?;
            let bbox = grid.tile_bbox(coord, false)?;
            match grid.limit_tile(coord) {
                Some(_) => println!("Tile {}", coord),
                None => println!("Tile {} (outside the grid)", coord),
            }
            println!("  BBox: {}", bbox);
        }
        GridAction::Affected { bbox, size, srs } => {
            let req_srs = srs
                .as_deref()
                .map(|code| registry.get(code))
                .transpose()
                .map_err(|e| CliError::Argument(e.to_string()))?;
            let affected = grid.affected_tiles(bbox, size, req_srs.as_deref())?;
            let level = affected
                .tiles
                .clone()
                .flatten()
                .next()
                .map(|t| t.z)
                .unwrap_or_default();
            println!(
                "Level {}: {}x{} tiles covering {}",
                level, affected.grid_size.0, affected.grid_size.1, affected.bbox
            );
            for tile in affected.tiles {
                match tile {
                    Some(coord) => println!("  {}", coord),
                    None => println!("  (outside grid)"),
                }
            }
        }
        GridAction::Meta { x, y, z } => {
            let meta_grid = MetaGrid::new(
                grid.clone(),
                config.cache.meta_size,
                config.cache.meta_buffer,
            );
            let meta_tile = meta_grid.meta_tile(TileCoord::new(x, y, z))?;
            let buffers = meta_tile.buffers();
            match meta_tile.main_tile_coord() {
                Some(main) => println!("Meta-tile of {}", main),
                None => println!("Meta-tile outside the grid"),
            }
            println!("  BBox:    {}", meta_tile.bbox());
            println!("  Size:    {}x{} px", meta_tile.size().0, meta_tile.size().1);
            println!(
                "  Buffers: left {} bottom {} right {} top {}",
                buffers.left, buffers.bottom, buffers.right, buffers.top
            );
            for (tile, (ox, oy)) in meta_tile.tile_patterns() {
                match tile {
                    Some(coord) => println!("  {} at ({}, {})", coord, ox, oy),
                    None => println!("  (outside grid) at ({}, {})", ox, oy),
                }
            }
        }
    }
    Ok(())
}
