//! Tile pyramid geometry.
//!
//! A [`TileGrid`] divides a bbox into a pyramid of levels. Each level has a
//! resolution (map units per pixel) and a grid size (tiles per axis). The
//! grid converts between map coordinates and [`TileCoord`]s, selects the
//! level for a requested resolution and enumerates the tiles covering a
//! request.
//!
//! [`MetaGrid`] groups the tiles of a grid into meta-tiles.
//!
//! # Example
//!
//! ```
//! use tilecache::grid::TileGrid;
//! use tilecache::coord::TileCoord;
//!
//! let grid = TileGrid::global_mercator();
//! assert_eq!(grid.tile(1000.0, 1000.0, 1).unwrap(), TileCoord::new(1, 1, 1));
//! ```

mod error;
mod meta;
mod resolution;

pub use error::GridError;
pub use meta::{MetaGrid, MetaTile, PixelBuffers};
pub use resolution::{
    closest_level, ResFactor, ResolutionScheme, DEFAULT_MAX_SHRINK_FACTOR, DEFAULT_NUM_LEVELS,
    DEFAULT_SQRT2_NUM_LEVELS, DEFAULT_STRETCH_FACTOR,
};

use std::fmt;
use std::sync::Arc;

use crate::coord::{BBox, Origin, TileCoord};
use crate::srs::{geographic_bbox, web_mercator_bbox, EquivalentOnly, Reprojector, Srs};

/// Default tile size in pixels.
pub const DEFAULT_TILE_SIZE: (u32, u32) = (256, 256);

/// Round to 12 decimal places to hide float noise in tile edges.
fn round12(v: f64) -> f64 {
    (v * 1e12).round() / 1e12
}

/// Tiles covering a request at one level.
#[derive(Debug, Clone)]
pub struct AffectedTiles {
    /// Bbox of all covering tiles.
    pub bbox: BBox,
    /// Number of covering tiles as (columns, rows).
    pub grid_size: (i64, i64),
    /// Covering tiles, row-major starting with the top row.
    pub tiles: TileIter,
}

/// Row-major iterator over a rectangle of tile positions.
///
/// Rows are produced from the top of the map downwards, matching the pixel
/// row order of a rendered image. Positions outside `limit` yield `None`.
#[derive(Debug, Clone)]
pub struct TileIter {
    x0: i64,
    x1: i64,
    ys: Vec<i64>,
    z: u32,
    limit: (i64, i64),
    row: usize,
    x: i64,
}

impl TileIter {
    pub(crate) fn new(x0: i64, x1: i64, ys: Vec<i64>, z: u32, limit: (i64, i64)) -> Self {
        Self {
            x0,
            x1,
            ys,
            z,
            limit,
            row: 0,
            x: x0,
        }
    }

    /// Total number of positions (including off-grid ones).
    pub fn total(&self) -> usize {
        ((self.x1 - self.x0 + 1).max(0) as usize) * self.ys.len()
    }
}

impl Iterator for TileIter {
    type Item = Option<TileCoord>;

    fn next(&mut self) -> Option<Self::Item> {
        let y = *self.ys.get(self.row)?;
        let x = self.x;
        if self.x >= self.x1 {
            self.x = self.x0;
            self.row += 1;
        } else {
            self.x += 1;
        }
        if x < 0 || y < 0 || x >= self.limit.0 || y >= self.limit.1 {
            Some(None)
        } else {
            Some(Some(TileCoord::new(x, y, self.z)))
        }
    }
}

/// A resolution pyramid of fixed-size tiles over a bbox.
#[derive(Clone)]
pub struct TileGrid {
    name: Option<String>,
    srs: Arc<Srs>,
    bbox: BBox,
    tile_size: (u32, u32),
    origin: Origin,
    resolutions: Vec<f64>,
    grid_sizes: Vec<(i64, i64)>,
    threshold_res: Vec<f64>,
    stretch_factor: f64,
    max_shrink_factor: f64,
    reprojector: Arc<dyn Reprojector>,
}

impl fmt::Debug for TileGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileGrid")
            .field("name", &self.name)
            .field("srs", &self.srs.code())
            .field("bbox", &self.bbox)
            .field("tile_size", &self.tile_size)
            .field("origin", &self.origin)
            .field("levels", &self.resolutions.len())
            .finish()
    }
}

impl TileGrid {
    /// Start building a grid.
    pub fn builder() -> TileGridBuilder {
        TileGridBuilder::default()
    }

    /// Global spherical Mercator grid, origin lower-left, 20 levels.
    pub fn global_mercator() -> Self {
        Self::global_web_mercator_grid("GLOBAL_MERCATOR", Origin::LowerLeft)
    }

    /// Global spherical Mercator grid, origin upper-left, 20 levels.
    pub fn global_webmercator() -> Self {
        Self::global_web_mercator_grid("GLOBAL_WEBMERCATOR", Origin::UpperLeft)
    }

    fn global_web_mercator_grid(name: &str, origin: Origin) -> Self {
        let bbox = web_mercator_bbox();
        let full_res = bbox.width() / DEFAULT_TILE_SIZE.0 as f64;
        Self::from_parts(
            Some(name.to_string()),
            Arc::new(Srs::web_mercator()),
            bbox,
            DEFAULT_TILE_SIZE,
            origin,
            resolution::by_factor(full_res, 2.0, DEFAULT_NUM_LEVELS),
        )
    }

    /// Global EPSG:4326 grid, origin lower-left, the world in one tile at
    /// level 0.
    pub fn global_geodetic() -> Self {
        Self::from_parts(
            Some("GLOBAL_GEODETIC".to_string()),
            Arc::new(Srs::wgs84()),
            geographic_bbox(),
            DEFAULT_TILE_SIZE,
            Origin::LowerLeft,
            resolution::by_factor(1.40625, 2.0, DEFAULT_NUM_LEVELS),
        )
    }

    /// Assemble a grid from checked parts with default level selection.
    fn from_parts(
        name: Option<String>,
        srs: Arc<Srs>,
        bbox: BBox,
        tile_size: (u32, u32),
        origin: Origin,
        resolutions: Vec<f64>,
    ) -> Self {
        let grid_sizes = resolutions
            .iter()
            .map(|res| {
                let x = ((bbox.width() / res).floor() / tile_size.0 as f64).ceil();
                let y = ((bbox.height() / res).floor() / tile_size.1 as f64).ceil();
                ((x as i64).max(1), (y as i64).max(1))
            })
            .collect();

        TileGrid {
            name,
            srs,
            bbox,
            tile_size,
            origin,
            resolutions,
            grid_sizes,
            threshold_res: Vec::new(),
            stretch_factor: DEFAULT_STRETCH_FACTOR,
            max_shrink_factor: DEFAULT_MAX_SHRINK_FACTOR,
            reprojector: Arc::new(EquivalentOnly),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stable identity used when delegating renders for this grid.
    pub fn identity(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!(
                "{}_{}x{}_{}",
                self.srs.code(),
                self.tile_size.0,
                self.tile_size.1,
                self.origin
            ),
        }
    }

    pub fn srs(&self) -> &Arc<Srs> {
        &self.srs
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn tile_size(&self) -> (u32, u32) {
        self.tile_size
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn resolutions(&self) -> &[f64] {
        &self.resolutions
    }

    pub fn threshold_res(&self) -> &[f64] {
        &self.threshold_res
    }

    pub fn stretch_factor(&self) -> f64 {
        self.stretch_factor
    }

    pub fn max_shrink_factor(&self) -> f64 {
        self.max_shrink_factor
    }

    /// Number of levels in the pyramid.
    pub fn levels(&self) -> u32 {
        self.resolutions.len() as u32
    }

    /// Resolution of `level`.
    pub fn resolution(&self, level: u32) -> Result<f64, GridError> {
        self.resolutions
            .get(level as usize)
            .copied()
            .ok_or(GridError::InvalidLevel(level))
    }

    /// Number of tiles (columns, rows) at `level`.
    pub fn grid_size(&self, level: u32) -> Result<(i64, i64), GridError> {
        self.grid_sizes
            .get(level as usize)
            .copied()
            .ok_or(GridError::InvalidLevel(level))
    }

    pub fn grid_sizes(&self) -> &[(i64, i64)] {
        &self.grid_sizes
    }

    /// Level that should serve requests of resolution `res`.
    pub fn closest_level(&self, res: f64) -> u32 {
        closest_level(
            &self.resolutions,
            res,
            &self.threshold_res,
            self.stretch_factor,
        ) as u32
    }

    /// Tile containing the map coordinate `(x, y)` at `level`.
    pub fn tile(&self, x: f64, y: f64, level: u32) -> Result<TileCoord, GridError> {
        let res = self.resolution(level)?;
        let dx = x - self.bbox.minx;
        let dy = match self.origin {
            Origin::UpperLeft => self.bbox.maxy - y,
            Origin::LowerLeft => y - self.bbox.miny,
        };
        let tile_x = dx / (res * self.tile_size.0 as f64);
        let tile_y = dy / (res * self.tile_size.1 as f64);
        Ok(TileCoord::new(
            tile_x.floor() as i64,
            tile_y.floor() as i64,
            level,
        ))
    }

    /// Map bbox of `coord`, optionally clipped to the grid bbox.
    pub fn tile_bbox(&self, coord: TileCoord, limit: bool) -> Result<BBox, GridError> {
        let res = self.resolution(coord.z)?;
        let tile_w = round12(res * self.tile_size.0 as f64);
        let tile_h = round12(res * self.tile_size.1 as f64);

        let x0 = self.bbox.minx + round12(coord.x as f64 * res * self.tile_size.0 as f64);
        let x1 = x0 + tile_w;
        let (y0, y1) = match self.origin {
            Origin::UpperLeft => {
                let y1 = self.bbox.maxy - round12(coord.y as f64 * res * self.tile_size.1 as f64);
                (y1 - tile_h, y1)
            }
            Origin::LowerLeft => {
                let y0 = self.bbox.miny + round12(coord.y as f64 * res * self.tile_size.1 as f64);
                (y0, y0 + tile_h)
            }
        };

        let bbox = BBox::new(x0, y0, x1, y1);
        if limit {
            Ok(BBox::new(
                bbox.minx.max(self.bbox.minx),
                bbox.miny.max(self.bbox.miny),
                bbox.maxx.min(self.bbox.maxx),
                bbox.maxy.min(self.bbox.maxy),
            ))
        } else {
            Ok(bbox)
        }
    }

    /// Bbox covering all `tiles` (which must not be empty).
    pub fn tiles_bbox(&self, tiles: &[TileCoord]) -> Result<BBox, GridError> {
        let (first, rest) = tiles.split_first().ok_or(GridError::InvalidBBox)?;
        let mut bbox = self.tile_bbox(*first, false)?;
        for coord in rest {
            bbox = bbox.merge(&self.tile_bbox(*coord, false)?);
        }
        Ok(bbox)
    }

    /// Returns `coord` if it lies inside the grid at its level.
    pub fn limit_tile(&self, coord: TileCoord) -> Option<TileCoord> {
        let (w, h) = self.grid_size(coord.z).ok()?;
        if coord.x < 0 || coord.y < 0 || coord.x >= w || coord.y >= h {
            None
        } else {
            Some(coord)
        }
    }

    /// Address of `coord` under the opposite origin convention.
    pub fn flip_tile_coord(&self, coord: TileCoord) -> Result<TileCoord, GridError> {
        let (_, h) = self.grid_size(coord.z)?;
        Ok(TileCoord::new(coord.x, h - 1 - coord.y, coord.z))
    }

    /// Tiles covering `bbox` when rendered at `size` pixels.
    ///
    /// `req_srs` is the SRS of `bbox`; `None` means the grid SRS.
    ///
    /// # Errors
    ///
    /// - [`GridError::NoTiles`] if the bbox is outside the grid or would need
    ///   more than `max_shrink_factor` downscaling
    /// - [`GridError::InvalidBBox`] if the bbox collapses at the level
    pub fn affected_tiles(
        &self,
        bbox: BBox,
        size: (u32, u32),
        req_srs: Option<&Srs>,
    ) -> Result<AffectedTiles, GridError> {
        let (src_bbox, level) = self.affected_bbox_and_level(bbox, size, req_srs)?;
        self.affected_level_tiles(src_bbox, level)
    }

    /// Transform `bbox` into the grid SRS and select the level for `size`.
    pub fn affected_bbox_and_level(
        &self,
        bbox: BBox,
        size: (u32, u32),
        req_srs: Option<&Srs>,
    ) -> Result<(BBox, u32), GridError> {
        let src_bbox = match req_srs {
            Some(srs) if !srs.is_equivalent(&self.srs) => {
                self.reprojector.transform_bbox(bbox, srs, &self.srs)?
            }
            _ => bbox,
        };

        if !src_bbox.is_valid() || !self.bbox.intersects(&src_bbox) {
            return Err(GridError::NoTiles);
        }

        let res = src_bbox.resolution_for(size);
        let level = self.closest_level(res);

        if res > self.resolutions[0] * self.max_shrink_factor {
            return Err(GridError::NoTiles);
        }

        Ok((src_bbox, level))
    }

    /// Tiles covering `bbox` at `level`.
    ///
    /// The bbox is shrunk by a tenth of a pixel on every side so that tiles
    /// only touched by an edge are not included.
    pub fn affected_level_tiles(&self, bbox: BBox, level: u32) -> Result<AffectedTiles, GridError> {
        let delta = self.resolution(level)? / 10.0;
        let ll = self.tile(bbox.minx + delta, bbox.miny + delta, level)?;
        let ur = self.tile(bbox.maxx - delta, bbox.maxy - delta, level)?;
        self.tiles_in_range(ll.x, ll.y, ur.x, ur.y, level)
    }

    /// Rectangle of tiles between two corner tiles.
    ///
    /// `(x0, y0)` is the tile of the south-west corner and `(x1, y1)` the
    /// tile of the north-east corner, both in the grid's own addressing.
    fn tiles_in_range(
        &self,
        x0: i64,
        y0: i64,
        x1: i64,
        y1: i64,
        level: u32,
    ) -> Result<AffectedTiles, GridError> {
        let ys = self.rows_top_down(y0.min(y1), y0.max(y1));
        if x1 < x0 || ys.is_empty() {
            return Err(GridError::InvalidBBox);
        }

        let top = ys[0];
        let bottom = ys[ys.len() - 1];
        let bbox = self
            .tile_bbox(TileCoord::new(x0, bottom, level), false)?
            .merge(&self.tile_bbox(TileCoord::new(x1, top, level), false)?);

        let grid_size = (x1 - x0 + 1, ys.len() as i64);
        let limit = self.grid_size(level)?;
        Ok(AffectedTiles {
            bbox,
            grid_size,
            tiles: TileIter::new(x0, x1, ys, level, limit),
        })
    }

    /// Row indices from `min_y` to `max_y`, ordered from the top of the map.
    pub(crate) fn rows_top_down(&self, min_y: i64, max_y: i64) -> Vec<i64> {
        match self.origin {
            Origin::UpperLeft => (min_y..=max_y).collect(),
            Origin::LowerLeft => (min_y..=max_y).rev().collect(),
        }
    }

    /// Returns `true` if every level of this grid exists in `other` with the
    /// same resolution and tile alignment over the same area.
    ///
    /// Tiles of a subset grid can be served from the other grid's cache
    /// without rendering.
    pub fn is_subset_of(&self, other: &TileGrid) -> bool {
        if !self.srs.is_equivalent(&other.srs) || self.tile_size != other.tile_size {
            return false;
        }

        for (level, &level_res) in self.resolutions.iter().enumerate() {
            let level = level as u32;
            let (w, h) = self.grid_sizes[level as usize];
            let level_size = (
                (w as u32).saturating_mul(self.tile_size.0),
                (h as u32).saturating_mul(self.tile_size.1),
            );
            let level_bbox = match self.tiles_bbox(&[
                TileCoord::new(0, 0, level),
                TileCoord::new(w - 1, h - 1, level),
            ]) {
                Ok(bbox) => bbox,
                Err(_) => return false,
            };

            let other_level = match other.affected_bbox_and_level(level_bbox, level_size, None) {
                Ok((_, l)) => l,
                Err(_) => return false,
            };
            let affected = match other.affected_level_tiles(level_bbox, other_level) {
                Ok(affected) => affected,
                Err(_) => return false,
            };

            let other_res = other.resolutions[other_level as usize];
            if (other_res - level_res).abs() > level_res * 1e-9 {
                return false;
            }
            if !affected.bbox.approx_eq(&level_bbox) {
                return false;
            }
        }
        true
    }

    /// Returns `true` if tiles can be addressed with `origin` by flipping
    /// the row index alone.
    ///
    /// This holds when every level covers exactly the grid bbox, so that
    /// the tile rows line up from both the top and the bottom edge.
    pub fn supports_access_with_origin(&self, origin: Origin) -> bool {
        if origin == self.origin {
            return true;
        }

        let delta = self.resolutions[0]
            .abs()
            .max(self.resolutions[self.resolutions.len() - 1].abs())
            / 1e12;

        for (level, &(w, h)) in self.grid_sizes.iter().enumerate() {
            let res = self.resolutions[level];
            let level_w = w as f64 * self.tile_size.0 as f64 * res;
            let level_h = h as f64 * self.tile_size.1 as f64 * res;

            let level_bbox = match self.origin {
                Origin::LowerLeft => BBox::new(
                    self.bbox.minx,
                    self.bbox.miny,
                    self.bbox.minx + level_w,
                    self.bbox.miny + level_h,
                ),
                Origin::UpperLeft => BBox::new(
                    self.bbox.minx,
                    self.bbox.maxy - level_h,
                    self.bbox.minx + level_w,
                    self.bbox.maxy,
                ),
            };

            let x_delta = delta.max(self.bbox.width().abs() * 1e-12);
            let y_delta = delta.max(self.bbox.height().abs() * 1e-12);
            if !level_bbox.equals_within(&self.bbox, x_delta, y_delta) {
                return false;
            }
        }
        true
    }
}

/// Builder for [`TileGrid`].
#[derive(Debug, Clone)]
pub struct TileGridBuilder {
    name: Option<String>,
    srs: Option<Arc<Srs>>,
    bbox: Option<BBox>,
    tile_size: (u32, u32),
    origin: Origin,
    scheme: ResolutionScheme,
    threshold_res: Vec<f64>,
    stretch_factor: f64,
    max_shrink_factor: f64,
    reprojector: Option<Arc<dyn Reprojector>>,
}

impl Default for TileGridBuilder {
    fn default() -> Self {
        Self {
            name: None,
            srs: None,
            bbox: None,
            tile_size: DEFAULT_TILE_SIZE,
            origin: Origin::LowerLeft,
            scheme: ResolutionScheme::default(),
            threshold_res: Vec::new(),
            stretch_factor: DEFAULT_STRETCH_FACTOR,
            max_shrink_factor: DEFAULT_MAX_SHRINK_FACTOR,
            reprojector: None,
        }
    }
}

impl TileGridBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Spatial reference of the grid (default EPSG:900913).
    pub fn srs(mut self, srs: impl Into<Arc<Srs>>) -> Self {
        self.srs = Some(srs.into());
        self
    }

    /// Grid extent; defaults to the SRS world extent.
    pub fn bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_size = (width, height);
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn resolutions(mut self, scheme: ResolutionScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn threshold_res(mut self, threshold_res: Vec<f64>) -> Self {
        self.threshold_res = threshold_res;
        self
    }

    pub fn stretch_factor(mut self, factor: f64) -> Self {
        self.stretch_factor = factor;
        self
    }

    pub fn max_shrink_factor(mut self, factor: f64) -> Self {
        self.max_shrink_factor = factor;
        self
    }

    pub fn reprojector(mut self, reprojector: Arc<dyn Reprojector>) -> Self {
        self.reprojector = Some(reprojector);
        self
    }

    /// Validate the definition and compute resolutions and grid sizes.
    pub fn build(self) -> Result<TileGrid, GridError> {
        let srs = self.srs.unwrap_or_else(|| Arc::new(Srs::web_mercator()));

        if self.tile_size.0 == 0 || self.tile_size.1 == 0 {
            return Err(GridError::Config("tile size must not be zero".to_string()));
        }
        if self.stretch_factor < 1.0 {
            return Err(GridError::Config(format!(
                "stretch factor {} is below 1.0",
                self.stretch_factor
            )));
        }
        if self.max_shrink_factor <= 0.0 {
            return Err(GridError::Config(format!(
                "max shrink factor {} must be positive",
                self.max_shrink_factor
            )));
        }

        let bbox = match self.bbox.or_else(|| srs.default_bbox()) {
            Some(bbox) => bbox,
            None => {
                return Err(GridError::Config(format!(
                    "no bbox given and no default extent known for {}",
                    srs
                )))
            }
        };
        if !bbox.is_valid() {
            return Err(GridError::Config(format!("invalid grid bbox {}", bbox)));
        }

        let resolutions = self.scheme.generate(&bbox, self.tile_size)?;

        let mut threshold_res = self.threshold_res;
        threshold_res.sort_by(|a, b| a.total_cmp(b));

        let mut grid = TileGrid::from_parts(
            self.name,
            srs,
            bbox,
            self.tile_size,
            self.origin,
            resolutions,
        );
        grid.threshold_res = threshold_res;
        grid.stretch_factor = self.stretch_factor;
        grid.max_shrink_factor = self.max_shrink_factor;
        if let Some(reprojector) = self.reprojector {
            grid.reprojector = reprojector;
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MERC: f64 = 20037508.342789244;

    fn collect(affected: AffectedTiles) -> Vec<Option<TileCoord>> {
        affected.tiles.collect()
    }

    #[test]
    fn test_global_mercator_level_0_bbox() {
        let grid = TileGrid::global_mercator();
        let bbox = grid.tile_bbox(TileCoord::new(0, 0, 0), false).unwrap();
        assert!(bbox.approx_eq(&BBox::new(-MERC, -MERC, MERC, MERC)));
        assert!((bbox.minx + 20037508.34).abs() < 0.01);
    }

    #[test]
    fn test_global_grids_match_builder_definitions() {
        let mercator = TileGrid::builder().build().unwrap();
        assert_eq!(TileGrid::global_mercator().resolutions(), mercator.resolutions());
        assert_eq!(TileGrid::global_mercator().grid_sizes(), mercator.grid_sizes());

        let webmercator = TileGrid::global_webmercator();
        assert_eq!(webmercator.origin(), Origin::UpperLeft);
        assert_eq!(webmercator.resolutions(), mercator.resolutions());

        let geodetic = TileGrid::builder()
            .srs(Srs::wgs84())
            .resolutions(ResolutionScheme::Range {
                min_res: Some(1.40625),
                max_res: None,
                num_levels: Some(DEFAULT_NUM_LEVELS),
                factor: ResFactor::default(),
            })
            .build()
            .unwrap();
        let global = TileGrid::global_geodetic();
        assert_eq!(global.resolutions(), geodetic.resolutions());
        assert_eq!(global.grid_sizes()[0], (1, 1));
        assert_eq!(global.grid_sizes(), geodetic.grid_sizes());
    }

    #[test]
    fn test_global_mercator_tile_lookup() {
        let grid = TileGrid::global_mercator();
        assert_eq!(grid.tile(1000.0, 1000.0, 1).unwrap(), TileCoord::new(1, 1, 1));
        assert_eq!(grid.tile(-1000.0, -1000.0, 1).unwrap(), TileCoord::new(0, 0, 1));
        assert_eq!(grid.tile(1000.0, 1000.0, 0).unwrap(), TileCoord::new(0, 0, 0));
    }

    #[test]
    fn test_upper_left_origin_flips_rows() {
        let grid = TileGrid::global_webmercator();
        assert_eq!(grid.tile(1000.0, 1000.0, 1).unwrap(), TileCoord::new(1, 0, 1));
        assert_eq!(grid.tile(1000.0, -1000.0, 1).unwrap(), TileCoord::new(1, 1, 1));
        let bbox = grid.tile_bbox(TileCoord::new(0, 0, 1), false).unwrap();
        assert!(bbox.approx_eq(&BBox::new(-MERC, 0.0, 0.0, MERC)));
    }

    #[test]
    fn test_grid_sizes() {
        let grid = TileGrid::global_mercator();
        assert_eq!(grid.grid_size(0).unwrap(), (1, 1));
        assert_eq!(grid.grid_size(1).unwrap(), (2, 2));
        assert_eq!(grid.grid_size(10).unwrap(), (1024, 1024));
        assert_eq!(grid.levels(), 20);
        assert!(grid.grid_size(20).is_err());
    }

    #[test]
    fn test_geodetic_grid_sizes() {
        let grid = TileGrid::global_geodetic();
        assert_eq!(grid.grid_size(0).unwrap(), (1, 1));
        assert_eq!(grid.grid_size(1).unwrap(), (2, 1));
        assert_eq!(grid.grid_size(2).unwrap(), (4, 2));
    }

    #[test]
    fn test_resolution_lookup() {
        let grid = TileGrid::global_mercator();
        assert!((grid.resolution(0).unwrap() - 156543.03392804097).abs() < 1e-6);
        assert_eq!(grid.resolution(42), Err(GridError::InvalidLevel(42)));
    }

    #[test]
    fn test_tile_bbox_limit() {
        let grid = TileGrid::builder()
            .bbox(BBox::new(0.0, 0.0, 1000.0, 1000.0))
            .resolutions(ResolutionScheme::Explicit(vec![3.0]))
            .build()
            .unwrap();
        // 1000 / 3 = 333 px -> two tiles, the second only partly inside
        assert_eq!(grid.grid_size(0).unwrap(), (2, 2));
        let unlimited = grid.tile_bbox(TileCoord::new(1, 1, 0), false).unwrap();
        assert!((unlimited.maxx - 1536.0).abs() < 1e-9);
        let limited = grid.tile_bbox(TileCoord::new(1, 1, 0), true).unwrap();
        assert_eq!(limited, BBox::new(768.0, 768.0, 1000.0, 1000.0));
    }

    #[test]
    fn test_limit_tile() {
        let grid = TileGrid::global_mercator();
        assert_eq!(
            grid.limit_tile(TileCoord::new(1, 1, 1)),
            Some(TileCoord::new(1, 1, 1))
        );
        assert_eq!(grid.limit_tile(TileCoord::new(2, 0, 1)), None);
        assert_eq!(grid.limit_tile(TileCoord::new(-1, 0, 1)), None);
        assert_eq!(grid.limit_tile(TileCoord::new(0, 0, 99)), None);
    }

    #[test]
    fn test_flip_tile_coord() {
        let grid = TileGrid::global_mercator();
        assert_eq!(
            grid.flip_tile_coord(TileCoord::new(0, 0, 2)).unwrap(),
            TileCoord::new(0, 3, 2)
        );
    }

    #[test]
    fn test_affected_tiles_whole_world() {
        let grid = TileGrid::global_mercator();
        let affected = grid
            .affected_tiles(BBox::new(-MERC, -MERC, MERC, MERC), (512, 512), None)
            .unwrap();
        assert_eq!(affected.grid_size, (2, 2));
        assert_eq!(
            collect(affected),
            vec![
                Some(TileCoord::new(0, 1, 1)),
                Some(TileCoord::new(1, 1, 1)),
                Some(TileCoord::new(0, 0, 1)),
                Some(TileCoord::new(1, 0, 1)),
            ]
        );
    }

    #[test]
    fn test_affected_tiles_upper_left_order() {
        let grid = TileGrid::global_webmercator();
        let affected = grid
            .affected_tiles(BBox::new(-MERC, -MERC, MERC, MERC), (512, 512), None)
            .unwrap();
        assert_eq!(
            collect(affected),
            vec![
                Some(TileCoord::new(0, 0, 1)),
                Some(TileCoord::new(1, 0, 1)),
                Some(TileCoord::new(0, 1, 1)),
                Some(TileCoord::new(1, 1, 1)),
            ]
        );
    }

    #[test]
    fn test_affected_tiles_edge_not_included() {
        let grid = TileGrid::global_mercator();
        // Exactly the south-west tile at level 1; touching edges are ignored.
        let affected = grid
            .affected_tiles(BBox::new(-MERC, -MERC, 0.0, 0.0), (256, 256), None)
            .unwrap();
        assert_eq!(affected.grid_size, (1, 1));
        assert_eq!(collect(affected), vec![Some(TileCoord::new(0, 0, 1))]);
    }

    #[test]
    fn test_affected_tiles_outside_grid_positions() {
        let grid = TileGrid::global_mercator();
        let affected = grid
            .affected_tiles(
                BBox::new(-MERC * 1.5, -MERC, 0.0, 0.0),
                (384, 256),
                None,
            )
            .unwrap();
        let tiles = collect(affected);
        assert_eq!(tiles, vec![None, Some(TileCoord::new(0, 0, 1))]);
    }

    #[test]
    fn test_affected_tiles_no_intersection() {
        let grid = TileGrid::global_mercator();
        let result = grid.affected_tiles(
            BBox::new(MERC * 2.0, 0.0, MERC * 3.0, MERC),
            (256, 256),
            None,
        );
        assert!(matches!(result, Err(GridError::NoTiles)));
    }

    #[test]
    fn test_affected_tiles_max_shrink_factor() {
        let grid = TileGrid::global_mercator();
        // Whole world into 32 pixels: 8x downscale of level 0 exceeds 4.0
        let result = grid.affected_tiles(BBox::new(-MERC, -MERC, MERC, MERC), (32, 32), None);
        assert!(matches!(result, Err(GridError::NoTiles)));
        // 2x downscale is fine
        let result = grid.affected_tiles(BBox::new(-MERC, -MERC, MERC, MERC), (128, 128), None);
        assert!(result.is_ok());
    }

    #[test]
    fn test_affected_tiles_rejects_foreign_srs() {
        let grid = TileGrid::global_mercator();
        let result = grid.affected_tiles(
            BBox::new(-10.0, -10.0, 10.0, 10.0),
            (256, 256),
            Some(&Srs::wgs84()),
        );
        assert!(matches!(result, Err(GridError::Srs(_))));

        let alias = Srs::from_code("EPSG:3857").unwrap();
        let result = grid.affected_tiles(BBox::new(-MERC, -MERC, MERC, MERC), (256, 256), Some(&alias));
        assert!(result.is_ok());
    }

    #[test]
    fn test_is_subset_of() {
        let full = TileGrid::global_mercator();
        let partial = TileGrid::builder()
            .resolutions(ResolutionScheme::Explicit(
                full.resolutions()[2..6].to_vec(),
            ))
            .build()
            .unwrap();
        assert!(partial.is_subset_of(&full));
        assert!(!full.is_subset_of(&partial));

        let shifted = TileGrid::builder()
            .bbox(BBox::new(-MERC + 1000.0, -MERC, MERC, MERC))
            .resolutions(ResolutionScheme::Explicit(
                full.resolutions()[2..6].to_vec(),
            ))
            .build()
            .unwrap();
        assert!(!shifted.is_subset_of(&full));

        let geodetic = TileGrid::global_geodetic();
        assert!(!geodetic.is_subset_of(&full));
    }

    #[test]
    fn test_supports_access_with_origin() {
        let grid = TileGrid::global_mercator();
        assert!(grid.supports_access_with_origin(Origin::LowerLeft));
        assert!(grid.supports_access_with_origin(Origin::UpperLeft));

        // Grid that is not tile aligned at the top edge
        let grid = TileGrid::builder()
            .bbox(BBox::new(0.0, 0.0, 1000.0, 1000.0))
            .resolutions(ResolutionScheme::Explicit(vec![3.0]))
            .build()
            .unwrap();
        assert!(!grid.supports_access_with_origin(Origin::UpperLeft));
        assert!(grid.supports_access_with_origin(Origin::LowerLeft));
    }

    #[test]
    fn test_builder_validation() {
        assert!(TileGrid::builder().tile_size(0, 256).build().is_err());
        assert!(TileGrid::builder().stretch_factor(0.5).build().is_err());
        assert!(TileGrid::builder()
            .bbox(BBox::new(10.0, 0.0, 0.0, 10.0))
            .build()
            .is_err());
        assert!(TileGrid::builder()
            .srs(Srs::from_code("EPSG:25832").unwrap())
            .build()
            .is_err());
    }

    #[test]
    fn test_thresholds_are_sorted() {
        let grid = TileGrid::builder()
            .threshold_res(vec![100.0, 10.0, 1000.0])
            .build()
            .unwrap();
        assert_eq!(grid.threshold_res(), &[10.0, 100.0, 1000.0]);
    }

    #[test]
    fn test_identity() {
        assert_eq!(TileGrid::global_mercator().identity(), "GLOBAL_MERCATOR");
        let anonymous = TileGrid::builder().build().unwrap();
        assert_eq!(anonymous.identity(), "EPSG:900913_256x256_ll");
    }
}
