//! tilecache CLI - Command-line interface
//!
//! Inspects grids and meta-tiles, renders test tiles and coordinates seed
//! locks using the tilecache library.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tilecache::logging::{default_log_dir, default_log_file, init_logging};
use tilecache::srs::SrsRegistry;

use commands::config::ConfigAction;
use commands::grid::GridAction;
use commands::render::RenderArgs;
use commands::seed::SeedAction;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilecache")]
#[command(version, about = "Tile grid, meta-tile and seed lock tools", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.tilecache/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect the tile grid
    Grid {
        #[command(subcommand)]
        action: GridAction,
    },
    /// Render a tile from a solid color source
    Render(RenderArgs),
    /// Coordinate seeding runs
    Seed {
        #[command(subcommand)]
        action: SeedAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_dir = cli.log_dir.clone().unwrap_or_else(default_log_dir);
    let _logging_guard = match init_logging(&log_dir, default_log_file()) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = commands::load_config(cli.config.as_deref())?;
    let registry = SrsRegistry::default();

    match cli.command {
        Commands::Config { action } => commands::config::run(action, &config),
        Commands::Grid { action } => commands::grid::run(action, &config, &registry),
        Commands::Render(args) => commands::render::run(args, &config, &registry),
        Commands::Seed { action } => commands::seed::run(action, &config),
    }
}
