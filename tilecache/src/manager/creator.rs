//! Tile creation.
//!
//! A [`TileCreator`] renders missing tiles for one request. Depending on
//! the manager configuration it renders tiles one by one, as aligned
//! meta-tiles, as one minimal meta-tile covering the whole request, or as
//! bulk meta-tiles whose tiles are fetched individually under a single lock.
//!
//! Every unit follows the same cycle: lock the main tile, check storage
//! again (another worker may have finished it meanwhile), render, split,
//! filter, store when cacheable, release.

use std::collections::HashSet;
use std::panic;
use std::thread;

use rayon::prelude::*;
use tracing::{debug, instrument, warn};

use crate::cache::Tile;
use crate::coord::{BBox, TileCoord};
use crate::grid::{MetaGrid, MetaTile};
use crate::source::{merge_images, split_meta_image, ImageSource, MapQuery, SourceError, SourceErrorPolicy};

use super::{ManagerError, RenderPriority, RenderRequest, TileManager};

/// Creates missing tiles of a [`TileManager`].
pub struct TileCreator<'a> {
    manager: &'a TileManager,
    priority: RenderPriority,
}

impl<'a> TileCreator<'a> {
    pub(super) fn new(manager: &'a TileManager, priority: RenderPriority) -> Self {
        Self { manager, priority }
    }

    pub fn priority(&self) -> RenderPriority {
        self.priority
    }

    /// Render and store `coords`.
    ///
    /// Returns the created tiles, which may include neighbours of the
    /// requested tiles rendered as part of the same meta-tile. Tiles that
    /// every source left blank are not returned.
    pub fn create_tiles(&self, coords: &[TileCoord]) -> Result<Vec<Tile>, ManagerError> {
        let manager = self.manager;
        if coords.is_empty() || (manager.sources.is_empty() && manager.delegate.is_none()) {
            return Ok(Vec::new());
        }

        match &manager.meta_grid {
            None => self.create_single_tiles(coords),
            Some(meta_grid) if manager.bulk_meta_tiles => self.create_bulk_meta_tiles(meta_grid, coords),
            Some(meta_grid) => self.create_meta_tiles(meta_grid, coords),
        }
    }

    fn create_single_tiles(&self, coords: &[TileCoord]) -> Result<Vec<Tile>, ManagerError> {
        let created = self.run_parallel(coords.to_vec(), |coord| self.create_single_tile(coord))?;
        Ok(created.into_iter().flatten().collect())
    }

    #[instrument(skip(self), fields(cache = %self.manager.identifier()))]
    fn create_single_tile(&self, coord: TileCoord) -> Result<Vec<Tile>, ManagerError> {
        let manager = self.manager;
        let _guard = manager.lock(coord)?;

        if manager.is_cached(Some(coord))? {
            debug!(tile = %coord, "Tile created by another worker");
            return Ok(vec![manager.load_stored(coord)?]);
        }

        let bbox = manager.grid.tile_bbox(coord, false)?;
        let Some(mut tile) = self.render_tile(coord, bbox)? else {
            return Ok(Vec::new());
        };
        self.finish(std::slice::from_mut(&mut tile))?;
        Ok(vec![tile])
    }

    fn create_meta_tiles(
        &self,
        meta_grid: &MetaGrid,
        coords: &[TileCoord],
    ) -> Result<Vec<Tile>, ManagerError> {
        if self.manager.minimize_meta_requests && coords.len() > 1 {
            let level = coords[0].z;
            if coords.iter().all(|c| c.z == level) {
                let meta_tile = meta_grid.minimal_meta_tile(coords)?;
                return self.create_meta_tile(meta_tile);
            }
        }

        let meta_tiles = aligned_meta_tiles(meta_grid, coords)?;
        let created = self.run_parallel(meta_tiles, |meta_tile| self.create_meta_tile(meta_tile))?;
        Ok(created.into_iter().flatten().collect())
    }

    #[instrument(skip(self, meta_tile), fields(
        cache = %self.manager.identifier(),
        main = ?meta_tile.main_tile_coord(),
        size = ?meta_tile.size(),
    ))]
    fn create_meta_tile(&self, meta_tile: MetaTile) -> Result<Vec<Tile>, ManagerError> {
        let manager = self.manager;
        let Some(main_tile) = meta_tile.main_tile_coord() else {
            return Ok(Vec::new());
        };
        let coords: Vec<TileCoord> = meta_tile.tiles().flatten().collect();

        let _guard = manager.lock(main_tile)?;

        if manager.all_cached(&coords)? {
            debug!("Meta-tile created by another worker");
            return coords.iter().map(|c| manager.load_stored(*c)).collect();
        }

        let Some(mut image) = self.render(meta_tile.bbox(), meta_tile.size(), &coords)? else {
            debug!("All sources blank for meta-tile");
            return Ok(Vec::new());
        };

        let mut tiles: Vec<Tile> = split_meta_image(
            &mut image,
            manager.grid.tile_size(),
            meta_tile.tile_patterns(),
        )?
        .into_iter()
        .map(|(coord, source)| Tile::with_source(Some(coord), source))
        .collect();

        self.finish(&mut tiles)?;
        debug!(tiles = tiles.len(), cacheable = image.cacheable(), "Rendered meta-tile");
        Ok(tiles)
    }

    fn create_bulk_meta_tiles(
        &self,
        meta_grid: &MetaGrid,
        coords: &[TileCoord],
    ) -> Result<Vec<Tile>, ManagerError> {
        let meta_tiles = aligned_meta_tiles(meta_grid, coords)?;
        let created = self.run_parallel(meta_tiles, |meta_tile| self.create_bulk_meta_tile(meta_tile))?;
        Ok(created.into_iter().flatten().collect())
    }

    /// Fetch every tile of `meta_tile` individually while holding the
    /// meta-tile lock.
    #[instrument(skip(self, meta_tile), fields(
        cache = %self.manager.identifier(),
        main = ?meta_tile.main_tile_coord(),
    ))]
    fn create_bulk_meta_tile(&self, meta_tile: MetaTile) -> Result<Vec<Tile>, ManagerError> {
        let manager = self.manager;
        let Some(main_tile) = meta_tile.main_tile_coord() else {
            return Ok(Vec::new());
        };
        let coords: Vec<TileCoord> = meta_tile.tiles().flatten().collect();

        let _guard = manager.lock(main_tile)?;

        if manager.all_cached(&coords)? {
            debug!("Bulk meta-tile created by another worker");
            return coords.iter().map(|c| manager.load_stored(*c)).collect();
        }

        let rendered = self.run_scoped(coords, |coord| {
            if manager.is_cached(Some(coord))? {
                return manager.load_stored(coord).map(Some);
            }
            let bbox = manager.grid.tile_bbox(coord, false)?;
            self.render_tile(coord, bbox)
        })?;

        let mut tiles: Vec<Tile> = rendered.into_iter().flatten().collect();
        self.finish(&mut tiles)?;
        Ok(tiles)
    }

    fn render_tile(&self, coord: TileCoord, bbox: BBox) -> Result<Option<Tile>, ManagerError> {
        let size = self.manager.grid.tile_size();
        Ok(self
            .render(bbox, size, &[coord])?
            .map(|source| Tile::with_source(Some(coord), source)))
    }

    /// Apply filters to and store the freshly rendered tiles among `tiles`.
    fn finish(&self, tiles: &mut [Tile]) -> Result<(), ManagerError> {
        let manager = self.manager;
        for tile in tiles.iter_mut().filter(|t| !t.stored) {
            for filter in &manager.filters {
                filter.apply(tile)?;
            }
        }

        for tile in tiles.iter_mut().filter(|t| !t.stored && t.cacheable) {
            manager.storage.store(tile)?;
        }
        Ok(())
    }

    /// Render `bbox` at `size` pixels with the delegate or the sources.
    ///
    /// Returns `None` if every source was blank.
    fn render(
        &self,
        bbox: BBox,
        size: (u32, u32),
        tiles: &[TileCoord],
    ) -> Result<Option<ImageSource>, ManagerError> {
        let manager = self.manager;

        if let Some(delegate) = &manager.delegate {
            let request = RenderRequest {
                grid: manager.grid.identity(),
                cache: manager.identifier().to_string(),
                bbox,
                size,
                tiles: tiles.to_vec(),
                priority: self.priority,
            };
            debug!(bbox = %bbox, priority = %self.priority, "Delegating render");
            return Ok(Some(delegate.render(&request)?));
        }

        let query = MapQuery {
            bbox,
            size,
            srs: manager.grid.srs().clone(),
            format: manager.format,
        };

        let sources: Vec<_> = manager.sources.iter().collect();
        let results: Vec<Result<ImageSource, SourceError>> =
            self.run_scoped(sources, |source| Ok(source.get_map(&query)))?;

        let mut layers = Vec::with_capacity(results.len());
        for (source, result) in manager.sources.iter().zip(results) {
            match result {
                Ok(image) => layers.push(image),
                Err(SourceError::Blank) => {}
                Err(error) => match manager.error_policy {
                    SourceErrorPolicy::Abort => {
                        warn!(source = source.name(), error = %error, "Source failed");
                        return Err(ManagerError::Source {
                            name: source.name().to_string(),
                            error,
                        });
                    }
                    SourceErrorPolicy::Placeholder { color, cacheable } => {
                        warn!(source = source.name(), error = %error, "Source failed, using placeholder");
                        layers.push(
                            ImageSource::solid(size, color, manager.format).with_cacheable(cacheable),
                        );
                    }
                },
            }
        }

        Ok(merge_images(layers, manager.format)?)
    }

    /// Run `f` over `items` on up to `concurrent_tile_creators` threads.
    ///
    /// Each call gets its own pool and units of one call never share a lock
    /// key. Work done while a unit holds its lock must go through
    /// [`Self::run_scoped`]: a rayon worker waiting on nested parallel work
    /// steals queued units and would block on their locks while holding
    /// its own.
    fn run_parallel<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, ManagerError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, ManagerError> + Sync + Send,
    {
        let threads = self.manager.concurrent_tile_creators.min(items.len());
        if threads <= 1 {
            return items.into_iter().map(f).collect();
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tile-creator-{}", i))
            .build()
            .map_err(|e| ManagerError::Pool(e.to_string()))?;
        pool.install(|| items.into_par_iter().map(f).collect())
    }

    /// Run `f` over `items` on up to `concurrent_tile_creators` scoped
    /// threads, in order.
    ///
    /// Used under a held lock. A thread joining here only waits and never
    /// picks up another unit.
    fn run_scoped<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, ManagerError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, ManagerError> + Sync,
    {
        let threads = self.manager.concurrent_tile_creators.min(items.len());
        if threads <= 1 {
            return items.into_iter().map(f).collect();
        }

        let chunk_size = items.len().div_ceil(threads);
        let mut items = items.into_iter();
        let mut chunks: Vec<Vec<T>> = Vec::with_capacity(threads);
        loop {
            let chunk: Vec<T> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }

        let f = &f;
        thread::scope(|scope| -> Result<Vec<R>, ManagerError> {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| {
                    scope.spawn(move || chunk.into_iter().map(f).collect::<Result<Vec<R>, _>>())
                })
                .collect();

            let mut results = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(chunk) => results.extend(chunk?),
                    Err(payload) => panic::resume_unwind(payload),
                }
            }
            Ok(results)
        })
    }
}

/// One aligned meta-tile per distinct main tile, in request order.
fn aligned_meta_tiles(meta_grid: &MetaGrid, coords: &[TileCoord]) -> Result<Vec<MetaTile>, ManagerError> {
    let mut seen = HashSet::new();
    let mut meta_tiles = Vec::new();
    for coord in coords {
        let main = meta_grid.main_tile(*coord)?;
        if seen.insert(main) {
            meta_tiles.push(meta_grid.meta_tile(main)?);
        }
    }
    Ok(meta_tiles)
}
