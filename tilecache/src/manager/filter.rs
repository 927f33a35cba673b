//! Filters applied to created tiles before they are stored.

use image::{imageops, ImageError, Rgba, RgbaImage};

use crate::cache::Tile;

/// Transforms a freshly created tile before it is stored.
///
/// Filters run after the meta-tile image is split, once per tile, in the
/// order they were registered. Tiles loaded from storage are not filtered
/// again.
pub trait TileFilter: Send + Sync {
    fn apply(&self, tile: &mut Tile) -> Result<(), ImageError>;
}

/// Stamps a translucent color block into a corner of every tile.
///
/// Marks tiles rendered by a particular deployment or source, e.g. to tell
/// test caches from production caches at a glance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Watermark {
    pub color: [u8; 4],
    /// Edge length of the block in pixels.
    pub size: u32,
}

impl TileFilter for Watermark {
    fn apply(&self, tile: &mut Tile) -> Result<(), ImageError> {
        let Some(source) = tile.source.as_mut() else {
            return Ok(());
        };
        let image = source.image_mut()?;
        let (width, height) = image.dimensions();
        let mark = RgbaImage::from_pixel(
            self.size.min(width),
            self.size.min(height),
            Rgba(self.color),
        );
        let y = height.saturating_sub(mark.height()) as i64;
        imageops::overlay(image, &mark, 0, y);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use crate::source::{ImageFormat, ImageSource};

    #[test]
    fn test_watermark_bottom_left() {
        let mut tile = Tile::with_source(
            Some(TileCoord::new(0, 0, 0)),
            ImageSource::solid((8, 8), [0, 0, 0, 255], ImageFormat::Png),
        );
        Watermark {
            color: [255, 255, 255, 255],
            size: 2,
        }
        .apply(&mut tile)
        .unwrap();

        let image = tile.source.as_mut().unwrap().as_image().unwrap();
        assert_eq!(image.get_pixel(0, 7).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(2, 7).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_watermark_without_image() {
        let mut tile = Tile::new(Some(TileCoord::new(0, 0, 0)));
        let filter = Watermark {
            color: [255, 0, 0, 128],
            size: 4,
        };
        assert!(filter.apply(&mut tile).is_ok());
    }
}
