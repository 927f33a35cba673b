//! Meta-tile batching.
//!
//! A [`MetaGrid`] groups `meta_size` neighbouring tiles of a [`TileGrid`]
//! into one meta-tile. The meta-tile is rendered as a single image, with an
//! optional pixel buffer around it to avoid clipped labels at tile edges,
//! and then split back into tiles using its tile pattern.

use std::sync::Arc;

use crate::coord::{BBox, TileCoord};

use super::{GridError, TileGrid};

/// Pixel buffer on each side of a meta-tile image.
///
/// Sides that would reach past the grid bbox are reduced, so values can be
/// smaller than the configured buffer and, for grids that are not tile
/// aligned, negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelBuffers {
    pub left: i64,
    pub bottom: i64,
    pub right: i64,
    pub top: i64,
}

/// A batch of tiles rendered as one image.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaTile {
    bbox: BBox,
    size: (u32, u32),
    grid_size: (i64, i64),
    buffers: PixelBuffers,
    tile_patterns: Vec<(Option<TileCoord>, (i64, i64))>,
}

impl MetaTile {
    /// Buffered bbox to request from the source.
    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    /// Pixel size of the buffered meta-tile image.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Tiles per axis (columns, rows).
    pub fn grid_size(&self) -> (i64, i64) {
        self.grid_size
    }

    pub fn buffers(&self) -> PixelBuffers {
        self.buffers
    }

    /// Each contained tile with the top-left pixel of its area in the
    /// meta-tile image, row-major from the top row.
    ///
    /// `None` entries mark positions outside the grid; they must be skipped,
    /// never stored.
    pub fn tile_patterns(&self) -> &[(Option<TileCoord>, (i64, i64))] {
        &self.tile_patterns
    }

    /// Contained tile positions in pattern order.
    pub fn tiles(&self) -> impl Iterator<Item = Option<TileCoord>> + '_ {
        self.tile_patterns.iter().map(|(coord, _)| *coord)
    }

    /// The tile with the lowest x and y; identifies the meta-tile for locking.
    pub fn main_tile_coord(&self) -> Option<TileCoord> {
        let mut coords = self.tile_patterns.iter().filter_map(|(coord, _)| *coord);
        let first = coords.next()?;
        Some(coords.fold(first, |acc, c| {
            TileCoord::new(acc.x.min(c.x), acc.y.min(c.y), acc.z)
        }))
    }
}

/// Groups the tiles of a [`TileGrid`] into meta-tiles.
#[derive(Debug, Clone)]
pub struct MetaGrid {
    grid: Arc<TileGrid>,
    meta_size: (u32, u32),
    meta_buffer: u32,
}

impl MetaGrid {
    /// Create a meta grid with `meta_size` tiles per axis and `meta_buffer`
    /// pixels of buffer around each meta-tile.
    pub fn new(grid: Arc<TileGrid>, meta_size: (u32, u32), meta_buffer: u32) -> Self {
        Self {
            grid,
            meta_size: (meta_size.0.max(1), meta_size.1.max(1)),
            meta_buffer,
        }
    }

    pub fn grid(&self) -> &Arc<TileGrid> {
        &self.grid
    }

    pub fn meta_size(&self) -> (u32, u32) {
        self.meta_size
    }

    pub fn meta_buffer(&self) -> u32 {
        self.meta_buffer
    }

    /// Meta size at `level`, reduced where the level has fewer tiles.
    fn level_meta_size(&self, level: u32) -> Result<(i64, i64), GridError> {
        let (w, h) = self.grid.grid_size(level)?;
        Ok((
            (self.meta_size.0 as i64).min(w),
            (self.meta_size.1 as i64).min(h),
        ))
    }

    /// First tile (lowest x and y) of the meta-tile containing `coord`.
    pub fn main_tile(&self, coord: TileCoord) -> Result<TileCoord, GridError> {
        let (mw, mh) = self.level_meta_size(coord.z)?;
        Ok(TileCoord::new(
            coord.x.div_euclid(mw) * mw,
            coord.y.div_euclid(mh) * mh,
            coord.z,
        ))
    }

    /// Tile positions of the meta-tile whose main tile is `main_tile`.
    pub fn tile_list(&self, main_tile: TileCoord) -> Result<Vec<Option<TileCoord>>, GridError> {
        let grid_size = self.level_meta_size(main_tile.z)?;
        self.meta_tile_list(main_tile, grid_size)
    }

    fn meta_tile_list(
        &self,
        main_tile: TileCoord,
        grid_size: (i64, i64),
    ) -> Result<Vec<Option<TileCoord>>, GridError> {
        let main = self.main_tile(main_tile)?;
        let maxx = main.x + grid_size.0 - 1;
        let maxy = main.y + grid_size.1 - 1;
        self.rectangle(main.x, main.y, maxx, maxy, main.z)
    }

    fn rectangle(
        &self,
        minx: i64,
        miny: i64,
        maxx: i64,
        maxy: i64,
        z: u32,
    ) -> Result<Vec<Option<TileCoord>>, GridError> {
        let limit = self.grid.grid_size(z)?;
        let ys = self.grid.rows_top_down(miny, maxy);
        Ok(super::TileIter::new(minx, maxx, ys, z, limit).collect())
    }

    /// Unbuffered bbox of the meta-tile whose main tile is `main_tile`.
    fn unbuffered_meta_bbox(&self, main_tile: TileCoord) -> Result<BBox, GridError> {
        let (mw, mh) = self.level_meta_size(main_tile.z)?;
        self.grid.tiles_bbox(&[
            main_tile,
            TileCoord::new(main_tile.x + mw - 1, main_tile.y + mh - 1, main_tile.z),
        ])
    }

    /// Grow `bbox` by the meta buffer, clipping at the grid bbox.
    ///
    /// A clipped side loses the geographic buffer and the matching pixels,
    /// keeping the resolution of the rendered image equal to the level
    /// resolution.
    fn buffered_bbox(&self, bbox: BBox, level: u32) -> Result<(BBox, PixelBuffers), GridError> {
        if self.meta_buffer == 0 {
            return Ok((bbox, PixelBuffers::default()));
        }

        let res = self.grid.resolution(level)?;
        let grid_bbox = self.grid.bbox();
        let buffer = self.meta_buffer as i64;
        let extent = self.meta_buffer as f64 * res;
        let pixels = |delta: f64| clipped_pixels(delta, res);

        let mut out = BBox::new(
            bbox.minx - extent,
            bbox.miny - extent,
            bbox.maxx + extent,
            bbox.maxy + extent,
        );
        let mut buffers = PixelBuffers {
            left: buffer,
            bottom: buffer,
            right: buffer,
            top: buffer,
        };

        if grid_bbox.minx > out.minx {
            buffers.left -= pixels(grid_bbox.minx - out.minx);
            out.minx = grid_bbox.minx;
        }
        if grid_bbox.miny > out.miny {
            buffers.bottom -= pixels(grid_bbox.miny - out.miny);
            out.miny = grid_bbox.miny;
        }
        if grid_bbox.maxx < out.maxx {
            buffers.right -= pixels(out.maxx - grid_bbox.maxx);
            out.maxx = grid_bbox.maxx;
        }
        if grid_bbox.maxy < out.maxy {
            buffers.top -= pixels(out.maxy - grid_bbox.maxy);
            out.maxy = grid_bbox.maxy;
        }

        Ok((out, buffers))
    }

    /// Buffered bbox of the meta-tile containing `coord`.
    pub fn meta_bbox(&self, coord: TileCoord) -> Result<BBox, GridError> {
        let main = self.main_tile(coord)?;
        let bbox = self.unbuffered_meta_bbox(main)?;
        Ok(self.buffered_bbox(bbox, main.z)?.0)
    }

    /// The aligned meta-tile containing `coord`.
    pub fn meta_tile(&self, coord: TileCoord) -> Result<MetaTile, GridError> {
        let main = self.main_tile(coord)?;
        let grid_size = self.level_meta_size(main.z)?;
        let bbox = self.unbuffered_meta_bbox(main)?;
        let (bbox, buffers) = self.buffered_bbox(bbox, main.z)?;
        let tiles = self.meta_tile_list(main, grid_size)?;
        Ok(self.assemble(bbox, buffers, grid_size, tiles))
    }

    /// Smallest meta-tile covering all `coords`.
    ///
    /// The result contains every tile inside the bounding rectangle of the
    /// input, not only the requested ones, since the rendered image is
    /// rectangular.
    ///
    /// # Errors
    ///
    /// [`GridError::InvalidBBox`] for an empty input or tiles from different
    /// levels.
    pub fn minimal_meta_tile(&self, coords: &[TileCoord]) -> Result<MetaTile, GridError> {
        let (first, rest) = coords.split_first().ok_or(GridError::InvalidBBox)?;
        let z = first.z;
        let (mut minx, mut miny, mut maxx, mut maxy) = (first.x, first.y, first.x, first.y);
        for coord in rest {
            if coord.z != z {
                return Err(GridError::InvalidBBox);
            }
            minx = minx.min(coord.x);
            miny = miny.min(coord.y);
            maxx = maxx.max(coord.x);
            maxy = maxy.max(coord.y);
        }

        let grid_size = (maxx - minx + 1, maxy - miny + 1);
        let tiles = self.rectangle(minx, miny, maxx, maxy, z)?;
        let bbox = self.grid.tiles_bbox(&[
            TileCoord::new(minx, miny, z),
            TileCoord::new(maxx, maxy, z),
        ])?;
        let (bbox, buffers) = self.buffered_bbox(bbox, z)?;
        Ok(self.assemble(bbox, buffers, grid_size, tiles))
    }

    fn assemble(
        &self,
        bbox: BBox,
        buffers: PixelBuffers,
        grid_size: (i64, i64),
        tiles: Vec<Option<TileCoord>>,
    ) -> MetaTile {
        let (tile_w, tile_h) = self.grid.tile_size();
        let (tile_w, tile_h) = (tile_w as i64, tile_h as i64);

        let width = grid_size.0 * tile_w + buffers.left + buffers.right;
        let height = grid_size.1 * tile_h + buffers.bottom + buffers.top;

        let offsets = (0..grid_size.1).flat_map(|row| {
            (0..grid_size.0).map(move |col| (col * tile_w + buffers.left, row * tile_h + buffers.top))
        });
        let tile_patterns = tiles.into_iter().zip(offsets).collect();

        MetaTile {
            bbox,
            size: (width.max(0) as u32, height.max(0) as u32),
            grid_size,
            buffers,
            tile_patterns,
        }
    }
}

/// Whole pixels covered by `delta` map units at `res`, rounded to five
/// decimals first so float noise does not drop a pixel.
fn clipped_pixels(delta: f64, res: f64) -> i64 {
    ((delta / res * 1e5).round() / 1e5).trunc() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Origin;
    use crate::grid::ResolutionScheme;

    const MERC: f64 = 20037508.342789244;

    fn mercator(meta_size: (u32, u32), buffer: u32) -> MetaGrid {
        MetaGrid::new(Arc::new(TileGrid::global_mercator()), meta_size, buffer)
    }

    fn t(x: i64, y: i64, z: u32) -> Option<TileCoord> {
        Some(TileCoord::new(x, y, z))
    }

    #[test]
    fn test_meta_tile_pattern_lower_left() {
        let mgrid = mercator((2, 2), 0);
        let meta = mgrid.meta_tile(TileCoord::new(0, 1, 1)).unwrap();
        assert_eq!(
            meta.tile_patterns(),
            &[
                (t(0, 1, 1), (0, 0)),
                (t(1, 1, 1), (256, 0)),
                (t(0, 0, 1), (0, 256)),
                (t(1, 0, 1), (256, 256)),
            ]
        );
        assert_eq!(meta.size(), (512, 512));
        assert!(meta.bbox().approx_eq(&BBox::new(-MERC, -MERC, MERC, MERC)));
        assert_eq!(meta.main_tile_coord(), Some(TileCoord::new(0, 0, 1)));
    }

    #[test]
    fn test_meta_tile_pattern_upper_left() {
        let grid = TileGrid::builder().origin(Origin::UpperLeft).build().unwrap();
        let mgrid = MetaGrid::new(Arc::new(grid), (2, 2), 0);
        let meta = mgrid.meta_tile(TileCoord::new(1, 1, 1)).unwrap();
        assert_eq!(
            meta.tile_patterns(),
            &[
                (t(0, 0, 1), (0, 0)),
                (t(1, 0, 1), (256, 0)),
                (t(0, 1, 1), (0, 256)),
                (t(1, 1, 1), (256, 256)),
            ]
        );
    }

    #[test]
    fn test_meta_size_is_limited_by_level() {
        let mgrid = mercator((4, 4), 0);
        let meta = mgrid.meta_tile(TileCoord::new(0, 0, 0)).unwrap();
        assert_eq!(meta.grid_size(), (1, 1));
        assert_eq!(meta.size(), (256, 256));
        assert_eq!(meta.tile_patterns(), &[(t(0, 0, 0), (0, 0))]);
    }

    #[test]
    fn test_main_tile_alignment() {
        let mgrid = mercator((4, 4), 0);
        assert_eq!(
            mgrid.main_tile(TileCoord::new(5, 7, 3)).unwrap(),
            TileCoord::new(4, 4, 3)
        );
        assert_eq!(
            mgrid.main_tile(TileCoord::new(3, 3, 3)).unwrap(),
            TileCoord::new(0, 0, 3)
        );
    }

    #[test]
    fn test_meta_buffer_is_clipped_at_grid_edge() {
        let mgrid = mercator((2, 2), 10);
        // Level 2 has 4x4 tiles; the meta-tile at (0, 0) touches the
        // west and south edges only.
        let meta = mgrid.meta_tile(TileCoord::new(1, 1, 2)).unwrap();
        assert_eq!(
            meta.buffers(),
            PixelBuffers {
                left: 0,
                bottom: 0,
                right: 10,
                top: 10
            }
        );
        assert_eq!(meta.size(), (522, 522));
        let res = mgrid.grid().resolution(2).unwrap();
        assert!((meta.bbox().minx + MERC).abs() < 1e-6);
        assert!((meta.bbox().maxx - (10.0 * res)).abs() < 1e-3);
        // Offsets respect the top buffer only
        assert_eq!(
            meta.tile_patterns(),
            &[
                (t(0, 1, 2), (0, 10)),
                (t(1, 1, 2), (256, 10)),
                (t(0, 0, 2), (0, 266)),
                (t(1, 0, 2), (256, 266)),
            ]
        );
    }

    #[test]
    fn test_meta_buffer_inside_grid() {
        let mgrid = mercator((2, 2), 10);
        let meta = mgrid.meta_tile(TileCoord::new(2, 2, 3)).unwrap();
        assert_eq!(
            meta.buffers(),
            PixelBuffers {
                left: 10,
                bottom: 10,
                right: 10,
                top: 10
            }
        );
        assert_eq!(meta.size(), (532, 532));
        assert_eq!(meta.tile_patterns()[0].1, (10, 10));
    }

    #[test]
    fn test_meta_tile_with_off_grid_tiles() {
        let grid = TileGrid::builder()
            .bbox(BBox::new(0.0, 0.0, 768.0, 768.0))
            .resolutions(ResolutionScheme::Explicit(vec![1.0]))
            .build()
            .unwrap();
        let mgrid = MetaGrid::new(Arc::new(grid), (2, 2), 0);
        let meta = mgrid.meta_tile(TileCoord::new(2, 2, 0)).unwrap();
        assert_eq!(
            meta.tiles().collect::<Vec<_>>(),
            vec![None, None, t(2, 2, 0), None]
        );
        assert_eq!(meta.main_tile_coord(), Some(TileCoord::new(2, 2, 0)));
    }

    #[test]
    fn test_minimal_meta_tile() {
        let mgrid = mercator((2, 2), 0);
        let meta = mgrid
            .minimal_meta_tile(&[TileCoord::new(0, 0, 2), TileCoord::new(1, 1, 2)])
            .unwrap();
        assert_eq!(meta.grid_size(), (2, 2));
        assert_eq!(
            meta.tiles().collect::<Vec<_>>(),
            vec![t(0, 1, 2), t(1, 1, 2), t(0, 0, 2), t(1, 0, 2)]
        );
    }

    #[test]
    fn test_minimal_meta_tile_scattered() {
        let mgrid = mercator((2, 2), 0);
        let meta = mgrid
            .minimal_meta_tile(&[TileCoord::new(1, 2, 3), TileCoord::new(3, 2, 3)])
            .unwrap();
        assert_eq!(meta.grid_size(), (3, 1));
        assert_eq!(meta.size(), (768, 256));
        assert_eq!(
            meta.tiles().collect::<Vec<_>>(),
            vec![t(1, 2, 3), t(2, 2, 3), t(3, 2, 3)]
        );
        assert_eq!(meta.main_tile_coord(), Some(TileCoord::new(1, 2, 3)));
    }

    #[test]
    fn test_minimal_meta_tile_errors() {
        let mgrid = mercator((2, 2), 0);
        assert_eq!(mgrid.minimal_meta_tile(&[]), Err(GridError::InvalidBBox));
        assert_eq!(
            mgrid.minimal_meta_tile(&[TileCoord::new(0, 0, 1), TileCoord::new(0, 0, 2)]),
            Err(GridError::InvalidBBox)
        );
    }

    #[test]
    fn test_clipped_pixels_truncate() {
        assert_eq!(clipped_pixels(2.6, 1.0), 2);
        assert_eq!(clipped_pixels(10.5, 0.5), 21);
        // Float noise just below a whole pixel still counts as that pixel
        assert_eq!(clipped_pixels(4.999_999_999, 1.0), 5);
        assert_eq!(clipped_pixels(0.4, 1.0), 0);
    }

    #[test]
    fn test_tile_list() {
        let mgrid = mercator((2, 2), 0);
        assert_eq!(
            mgrid.tile_list(TileCoord::new(2, 2, 2)).unwrap(),
            vec![t(2, 3, 2), t(3, 3, 2), t(2, 2, 2), t(3, 2, 2)]
        );
    }
}
