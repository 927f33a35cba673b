//! Tile records moving between the manager and storages.

use std::collections::HashMap;
use std::time::SystemTime;

use image::ImageError;

use crate::coord::TileCoord;
use crate::source::ImageSource;

/// A single tile and its image.
///
/// A tile without a coordinate marks a position outside the grid. It is
/// reported as cached, has no image, and is never stored.
#[derive(Debug, Clone)]
pub struct Tile {
    pub coord: Option<TileCoord>,
    pub source: Option<ImageSource>,
    /// Set once the tile was written to (or read from) storage.
    pub stored: bool,
    pub cacheable: bool,
    /// Last write time as reported by the storage.
    pub timestamp: Option<SystemTime>,
}

impl Tile {
    pub fn new(coord: Option<TileCoord>) -> Self {
        Self {
            coord,
            source: None,
            stored: false,
            cacheable: true,
            timestamp: None,
        }
    }

    pub fn with_source(coord: Option<TileCoord>, source: ImageSource) -> Self {
        let cacheable = source.cacheable();
        Self {
            coord,
            source: Some(source),
            stored: false,
            cacheable,
            timestamp: None,
        }
    }

    /// Returns `true` for off-grid positions.
    pub fn is_missing(&self) -> bool {
        self.coord.is_none()
    }

    /// Encoded image bytes, if the tile has an image.
    pub fn source_buffer(&mut self) -> Result<Option<&[u8]>, ImageError> {
        match self.source.as_mut() {
            Some(source) => source.as_buffer().map(Some),
            None => Ok(None),
        }
    }
}

/// Tiles of one request, in request order, with lookup by coordinate.
#[derive(Debug, Clone, Default)]
pub struct TileCollection {
    tiles: Vec<Tile>,
    index: HashMap<TileCoord, usize>,
}

impl TileCollection {
    /// Create empty tiles for `coords`.
    pub fn new<I>(coords: I) -> Self
    where
        I: IntoIterator<Item = Option<TileCoord>>,
    {
        coords.into_iter().map(Tile::new).collect()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        self.index.contains_key(coord)
    }

    pub fn get(&self, coord: &TileCoord) -> Option<&Tile> {
        self.index.get(coord).map(|&i| &self.tiles[i])
    }

    pub fn get_mut(&mut self, coord: &TileCoord) -> Option<&mut Tile> {
        match self.index.get(coord) {
            Some(&i) => Some(&mut self.tiles[i]),
            None => None,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tile> {
        self.tiles.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Tile> {
        self.tiles.iter_mut()
    }

    pub fn as_mut_slice(&mut self) -> &mut [Tile] {
        &mut self.tiles
    }

    /// Coordinates in request order.
    pub fn coords(&self) -> impl Iterator<Item = Option<TileCoord>> + '_ {
        self.tiles.iter().map(|t| t.coord)
    }

    /// Returns `true` if every on-grid tile has an image.
    pub fn all_loaded(&self) -> bool {
        self.tiles
            .iter()
            .all(|t| t.is_missing() || t.source.is_some())
    }

    /// Replace the tile with the same coordinate, or append it.
    pub fn put(&mut self, tile: Tile) {
        match tile.coord.and_then(|c| self.index.get(&c).copied()) {
            Some(i) => self.tiles[i] = tile,
            None => self.push(tile),
        }
    }

    fn push(&mut self, tile: Tile) {
        if let Some(coord) = tile.coord {
            self.index.entry(coord).or_insert(self.tiles.len());
        }
        self.tiles.push(tile);
    }

    pub fn into_vec(self) -> Vec<Tile> {
        self.tiles
    }
}

impl FromIterator<Tile> for TileCollection {
    fn from_iter<T: IntoIterator<Item = Tile>>(iter: T) -> Self {
        let mut collection = TileCollection::default();
        for tile in iter {
            collection.push(tile);
        }
        collection
    }
}

impl IntoIterator for TileCollection {
    type Item = Tile;
    type IntoIter = std::vec::IntoIter<Tile>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.into_iter()
    }
}

impl<'a> IntoIterator for &'a TileCollection {
    type Item = &'a Tile;
    type IntoIter = std::slice::Iter<'a, Tile>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ImageFormat;

    #[test]
    fn test_collection_keeps_order_and_index() {
        let coords = vec![
            Some(TileCoord::new(1, 0, 1)),
            None,
            Some(TileCoord::new(0, 0, 1)),
        ];
        let collection = TileCollection::new(coords.clone());
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.coords().collect::<Vec<_>>(), coords);
        assert!(collection.contains(&TileCoord::new(0, 0, 1)));
        assert!(collection.get(&TileCoord::new(5, 5, 1)).is_none());
    }

    #[test]
    fn test_put_replaces_existing_tile() {
        let mut collection = TileCollection::new(vec![Some(TileCoord::new(0, 0, 0))]);
        assert!(!collection.all_loaded());
        collection.put(Tile::with_source(
            Some(TileCoord::new(0, 0, 0)),
            ImageSource::solid((1, 1), [0; 4], ImageFormat::Png),
        ));
        assert_eq!(collection.len(), 1);
        assert!(collection.all_loaded());
    }

    #[test]
    fn test_missing_tiles_count_as_loaded() {
        let collection = TileCollection::new(vec![None, None]);
        assert!(collection.all_loaded());
        assert!(collection.iter().all(Tile::is_missing));
    }

    #[test]
    fn test_with_source_inherits_cacheable() {
        let source = ImageSource::solid((1, 1), [0; 4], ImageFormat::Png).with_cacheable(false);
        let tile = Tile::with_source(None, source);
        assert!(!tile.cacheable);
    }
}
