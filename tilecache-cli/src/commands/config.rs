//! Configuration commands.

use clap::Subcommand;
use tilecache::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Write a default config file if none exists
    Init,
    /// Print the path of the config file
    Path,
    /// Print the effective configuration
    Show,
}

/// Run a config subcommand.
pub fn run(action: ConfigAction, config: &ConfigFile) -> Result<(), CliError> {
    match action {
        ConfigAction::Init => {
            let path = ConfigFile::ensure_exists()?;
            println!("Config file: {}", path.display());
        }
        ConfigAction::Path => println!("{}", config_file_path().display()),
        ConfigAction::Show => {
            let grid = &config.grid;
            let cache = &config.cache;
            println!("[grid]");
            println!("  srs = {}", grid.srs);
            println!("  origin = {}", grid.origin);
            println!("  tile_size = {}x{}", grid.tile_size.0, grid.tile_size.1);
            println!("[cache]");
            println!("  name = {}", cache.name);
            println!("  format = {}", cache.format);
            println!("  meta_size = {}x{}", cache.meta_size.0, cache.meta_size.1);
            println!("  meta_buffer = {}", cache.meta_buffer);
            println!("  concurrent_tile_creators = {}", cache.concurrent_tile_creators);
            println!("[lock]");
            println!("  kind = {}", config.lock.kind);
            println!("  directory = {}", config.lock.directory.display());
            println!("[seed]");
            println!("  lock_file = {}", config.seed.lock_file.display());
        }
    }
    Ok(())
}
