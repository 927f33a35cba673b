//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and exit codes.

use std::fmt;
use std::process;

use tilecache::config::ConfigFileError;
use tilecache::grid::GridError;
use tilecache::manager::ManagerError;
use tilecache::seed::SeedLockError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded or is invalid
    Config(ConfigFileError),
    /// Invalid command line argument
    Argument(String),
    /// Grid computation failed
    Grid(GridError),
    /// Tile creation failed
    Render(ManagerError),
    /// Seed lock could not be acquired
    SeedLock(SeedLockError),
    /// Failed to write output file
    FileWrite { path: String, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an error message and code.
    ///
    /// A seed lock held by another process exits with code 2 so scripts can
    /// tell "busy" from "broken".
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Grid(e) if e.is_empty_result() => {
                eprintln!();
                eprintln!("The request does not cover any tile of the grid.");
            }
            CliError::SeedLock(e) if e.is_retryable() => process::exit(2),
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Argument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Grid(e) => write!(f, "Grid error: {}", e),
            CliError::Render(e) => write!(f, "Failed to create tile: {}", e),
            CliError::SeedLock(e) => write!(f, "Seed lock error: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Grid(e) => Some(e),
            CliError::Render(e) => Some(e),
            CliError::SeedLock(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<GridError> for CliError {
    fn from(e: GridError) -> Self {
        CliError::Grid(e)
    }
}

impl From<ManagerError> for CliError {
    fn from(e: ManagerError) -> Self {
        CliError::Render(e)
    }
}

impl From<SeedLockError> for CliError {
    fn from(e: SeedLockError) -> Self {
        CliError::SeedLock(e)
    }
}
