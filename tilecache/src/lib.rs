//! tilecache - tile pyramid geometry and tile creation for caching map proxies
//!
//! This library provides the core of a caching tile proxy:
//!
//! - [`grid`]: tile pyramids, level selection and meta-tile geometry
//! - [`manager`]: loading tiles from storage and creating missing ones from
//!   upstream sources, batched into meta-tiles
//! - [`lock`]: per meta-tile render locks shared by threads or processes
//! - [`seed`]: per-cache seed locks across processes
//! - [`cache`] and [`source`]: the storage and source seams
//! - [`config`] and [`logging`]: INI configuration and tracing setup

pub mod cache;
pub mod config;
pub mod coord;
pub mod grid;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod seed;
pub mod source;
pub mod srs;

pub use coord::{BBox, Origin, TileCoord};
pub use grid::{MetaGrid, MetaTile, TileGrid};
pub use manager::{TileManager, TileManagerBuilder};
