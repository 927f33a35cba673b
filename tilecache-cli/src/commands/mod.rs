//! CLI subcommands.

pub mod config;
pub mod grid;
pub mod render;
pub mod seed;

use std::path::Path;

use tilecache::config::ConfigFile;

use crate::error::CliError;

/// Load the config from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Parse `"w,h"` or `"wxh"` pixel sizes.
pub fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = s.split([',', 'x']).collect();
    match parts.as_slice() {
        [w, h] => {
            let w = w.trim().parse().map_err(|_| format!("invalid width in '{}'", s))?;
            let h = h.trim().parse().map_err(|_| format!("invalid height in '{}'", s))?;
            Ok((w, h))
        }
        _ => Err(format!("expected WIDTHxHEIGHT, got '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512x256"), Ok((512, 256)));
        assert_eq!(parse_size("256,256"), Ok((256, 256)));
        assert!(parse_size("256").is_err());
        assert!(parse_size("ax1").is_err());
    }
}
