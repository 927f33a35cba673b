//! INI serialization: [`ConfigFile`] → commented INI string.

use std::path::Path;

use crate::grid::ResFactor;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to the commented INI written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let grid = &config.grid;
    let name = grid.name.as_deref().unwrap_or("");
    let bbox = grid
        .bbox
        .map(|b| format!("{},{},{},{}", b.minx, b.miny, b.maxx, b.maxy))
        .unwrap_or_default();
    let res = grid.res.as_deref().map(join_numbers).unwrap_or_default();
    let res_factor = match grid.res_factor {
        ResFactor::Sqrt2 => "sqrt2".to_string(),
        ResFactor::Value(v) => v.to_string(),
    };
    let num_levels = grid.num_levels.map(|n| n.to_string()).unwrap_or_default();
    let min_res = grid.min_res.map(|r| r.to_string()).unwrap_or_default();
    let max_res = grid.max_res.map(|r| r.to_string()).unwrap_or_default();
    let threshold_res = join_numbers(&grid.threshold_res);

    let cache = &config.cache;
    let seed_timeout = config
        .seed
        .timeout_secs
        .map(|t| t.to_string())
        .unwrap_or_default();

    format!(
        r#"[grid]
; Optional grid name, used as its identity for render delegation
name = {name}
srs = {srs}
; minx,miny,maxx,maxy (empty: SRS extent)
bbox = {bbox}
tile_size = {tw},{th}
; ll (lower-left) or ul (upper-left)
origin = {origin}
; Explicit resolutions, coarsest first (overrides the keys below)
res = {res}
; Ratio between levels: a number or sqrt2
res_factor = {res_factor}
num_levels = {num_levels}
min_res = {min_res}
max_res = {max_res}
threshold_res = {threshold_res}
stretch_factor = {stretch_factor}
max_shrink_factor = {max_shrink_factor}

[cache]
name = {cache_name}
; png or jpeg
format = {format}
; Tiles per meta-tile (columns,rows)
meta_size = {mw},{mh}
; Extra pixels rendered around each meta-tile
meta_buffer = {meta_buffer}
minimize_meta_requests = {minimize}
; Fetch meta-tiles tile by tile when sources cannot render meta-tiles
bulk_meta_tiles = {bulk}
concurrent_tile_creators = {creators}
; In-memory tile storage size in bytes
memory_size = {memory_size}

[lock]
; memory, file or none
kind = {lock_kind}
directory = {lock_dir}
; Seconds to wait for a tile lock
timeout = {lock_timeout}

[seed]
lock_file = {seed_file}
poll_interval_ms = {seed_poll}
; Seconds to wait for a seed lock (empty: wait forever)
timeout = {seed_timeout}
"#,
        srs = grid.srs,
        tw = grid.tile_size.0,
        th = grid.tile_size.1,
        origin = grid.origin,
        stretch_factor = grid.stretch_factor,
        max_shrink_factor = grid.max_shrink_factor,
        cache_name = cache.name,
        format = cache.format.extension(),
        mw = cache.meta_size.0,
        mh = cache.meta_size.1,
        meta_buffer = cache.meta_buffer,
        minimize = cache.minimize_meta_requests,
        bulk = cache.bulk_meta_tiles,
        creators = cache.concurrent_tile_creators,
        memory_size = cache.memory_size,
        lock_kind = config.lock.kind,
        lock_dir = path_to_string(&config.lock.directory),
        lock_timeout = config.lock.timeout_secs,
        seed_file = path_to_string(&config.seed.lock_file),
        seed_poll = config.seed.poll_interval_ms,
    )
}

fn join_numbers(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
