//! INI parsing: `Ini` → [`ConfigFile`].
//!
//! The single place where INI key names are mapped to settings fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays the values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [grid]
    if let Some(section) = ini.section(Some("grid")) {
        let grid = &mut config.grid;
        if let Some(v) = non_empty(section, "name") {
            grid.name = Some(v.to_string());
        }
        if let Some(v) = non_empty(section, "srs") {
            grid.srs = v.to_string();
        }
        if let Some(v) = non_empty(section, "bbox") {
            grid.bbox = Some(parse_with(
                "grid",
                "bbox",
                v,
                "expected 'minx,miny,maxx,maxy'",
            )?);
        }
        if let Some(v) = non_empty(section, "tile_size") {
            grid.tile_size = parse_pair("grid", "tile_size", v)?;
        }
        if let Some(v) = non_empty(section, "origin") {
            grid.origin = parse_with("grid", "origin", v, "must be 'll' or 'ul'")?;
        }
        if let Some(v) = non_empty(section, "res") {
            grid.res = Some(parse_list("grid", "res", v)?);
        }
        if let Some(v) = non_empty(section, "res_factor") {
            grid.res_factor = parse_with(
                "grid",
                "res_factor",
                v,
                "must be a number or 'sqrt2'",
            )?;
        }
        if let Some(v) = non_empty(section, "num_levels") {
            grid.num_levels = Some(parse_with(
                "grid",
                "num_levels",
                v,
                "must be a positive integer",
            )?);
        }
        if let Some(v) = non_empty(section, "min_res") {
            grid.min_res = Some(parse_with("grid", "min_res", v, "must be a number")?);
        }
        if let Some(v) = non_empty(section, "max_res") {
            grid.max_res = Some(parse_with("grid", "max_res", v, "must be a number")?);
        }
        if let Some(v) = non_empty(section, "threshold_res") {
            grid.threshold_res = parse_list("grid", "threshold_res", v)?;
        }
        if let Some(v) = non_empty(section, "stretch_factor") {
            grid.stretch_factor = parse_with("grid", "stretch_factor", v, "must be a number")?;
        }
        if let Some(v) = non_empty(section, "max_shrink_factor") {
            grid.max_shrink_factor =
                parse_with("grid", "max_shrink_factor", v, "must be a number")?;
        }
    }

    // [cache]
    if let Some(section) = ini.section(Some("cache")) {
        let cache = &mut config.cache;
        if let Some(v) = non_empty(section, "name") {
            cache.name = v.to_string();
        }
        if let Some(v) = non_empty(section, "format") {
            cache.format = parse_with("cache", "format", v, "must be 'png' or 'jpeg'")?;
        }
        if let Some(v) = non_empty(section, "meta_size") {
            cache.meta_size = parse_pair("cache", "meta_size", v)?;
        }
        if let Some(v) = non_empty(section, "meta_buffer") {
            cache.meta_buffer = parse_with(
                "cache",
                "meta_buffer",
                v,
                "must be a non-negative integer (pixels)",
            )?;
        }
        if let Some(v) = non_empty(section, "minimize_meta_requests") {
            cache.minimize_meta_requests = parse_bool("cache", "minimize_meta_requests", v)?;
        }
        if let Some(v) = non_empty(section, "bulk_meta_tiles") {
            cache.bulk_meta_tiles = parse_bool("cache", "bulk_meta_tiles", v)?;
        }
        if let Some(v) = non_empty(section, "concurrent_tile_creators") {
            let count: usize = parse_with(
                "cache",
                "concurrent_tile_creators",
                v,
                "must be a positive integer",
            )?;
            if count == 0 {
                return Err(invalid(
                    "cache",
                    "concurrent_tile_creators",
                    v,
                    "must be a positive integer",
                ));
            }
            cache.concurrent_tile_creators = count;
        }
        if let Some(v) = non_empty(section, "memory_size") {
            cache.memory_size = parse_with(
                "cache",
                "memory_size",
                v,
                "must be a positive integer (bytes)",
            )?;
        }
    }

    // [lock]
    if let Some(section) = ini.section(Some("lock")) {
        if let Some(v) = non_empty(section, "kind") {
            config.lock.kind = parse_with("lock", "kind", v, "must be one of: memory, file, none")?;
        }
        if let Some(v) = non_empty(section, "directory") {
            config.lock.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "timeout") {
            config.lock.timeout_secs = parse_with(
                "lock",
                "timeout",
                v,
                "must be a positive integer (seconds)",
            )?;
        }
    }

    // [seed]
    if let Some(section) = ini.section(Some("seed")) {
        if let Some(v) = non_empty(section, "lock_file") {
            config.seed.lock_file = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "poll_interval_ms") {
            config.seed.poll_interval_ms = parse_with(
                "seed",
                "poll_interval_ms",
                v,
                "must be a positive integer (milliseconds)",
            )?;
        }
        if let Some(v) = non_empty(section, "timeout") {
            config.seed.timeout_secs = Some(parse_with(
                "seed",
                "timeout",
                v,
                "must be a positive integer (seconds)",
            )?);
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_with<T: FromStr>(
    section: &str,
    key: &str,
    value: &str,
    reason: &str,
) -> Result<T, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(section, key, value, reason))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigFileError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, value, "must be true or false")),
    }
}

/// Parse `"w,h"` (or a single value used for both).
fn parse_pair(section: &str, key: &str, value: &str) -> Result<(u32, u32), ConfigFileError> {
    let reason = "expected two positive integers like '4,4'";
    let parts: Vec<u32> = value
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid(section, key, value, reason))?;
    match parts.as_slice() {
        [w, h] if *w > 0 && *h > 0 => Ok((*w, *h)),
        [n] if *n > 0 => Ok((*n, *n)),
        _ => Err(invalid(section, key, value, reason)),
    }
}

fn parse_list(section: &str, key: &str, value: &str) -> Result<Vec<f64>, ConfigFileError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid(section, key, value, "expected a comma separated list of numbers"))
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
