//! Seed lock commands.

use std::thread;
use std::time::Duration;

use clap::Subcommand;
use tilecache::config::ConfigFile;
use tilecache::seed::{CacheLock, LockMode};
use tracing::info;

use crate::error::CliError;

/// Seed lock subcommands.
#[derive(Debug, Subcommand)]
pub enum SeedAction {
    /// Acquire the seed lock of a cache, hold it, then release it
    Lock {
        /// Cache name (defaults to the configured cache)
        cache: Option<String>,
        /// Fail immediately if another process holds the lock
        #[arg(long)]
        no_wait: bool,
        /// Seconds to hold the lock once acquired
        #[arg(long, default_value = "0")]
        hold: u64,
    },

    /// List the processes holding or waiting for the seed lock
    Status {
        /// Cache name (defaults to the configured cache)
        cache: Option<String>,
    },
}

/// Run a seed subcommand.
pub fn run(action: SeedAction, config: &ConfigFile) -> Result<(), CliError> {
    let locker = config.cache_locker();

    match action {
        SeedAction::Lock {
            cache,
            no_wait,
            hold,
        } => {
            let cache = cache.unwrap_or_else(|| config.cache.name.clone());
            let mode = if no_wait {
                LockMode::NonBlocking
            } else {
                LockMode::Blocking
            };
            let guard = locker.lock(&cache, mode)?;
            info!(cache = %cache, pid = locker.pid(), "Seed lock acquired");
            println!("Acquired seed lock for '{}'", cache);
            if hold > 0 {
                thread::sleep(Duration::from_secs(hold));
            }
            guard.release();
            println!("Released seed lock for '{}'", cache);
        }
        SeedAction::Status { cache } => {
            let cache = cache.unwrap_or_else(|| config.cache.name.clone());
            let holders = locker.holders(&cache)?;
            println!("Seed lock database: {}", locker.path().display());
            if holders.is_empty() {
                println!("'{}' is not locked", cache);
            } else {
                println!("'{}' held by pid {}", cache, holders[0]);
                for pid in &holders[1..] {
                    println!("  waiting: pid {}", pid);
                }
            }
        }
    }
    Ok(())
}
