//! Coordinate value types
//!
//! Provides the tile address (`TileCoord`), the axis-aligned bounding box
//! (`BBox`) and the origin convention (`Origin`) shared by the grid, the
//! meta grid and the tile manager.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address of a single tile in a tile pyramid.
///
/// `x` grows eastward. The direction of `y` depends on the grid origin:
/// for [`Origin::LowerLeft`] row 0 is the southernmost row, for
/// [`Origin::UpperLeft`] it is the northernmost row.
///
/// Positions outside the grid are represented as `Option<TileCoord>::None`
/// wherever a list of tiles may reach past the grid edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Tile column.
    pub x: i64,
    /// Tile row.
    pub y: i64,
    /// Level index into the grid's resolutions.
    pub z: u32,
}

impl TileCoord {
    /// Create a new tile coordinate.
    pub fn new(x: i64, y: i64, z: u32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<(i64, i64, u32)> for TileCoord {
    fn from((x, y, z): (i64, i64, u32)) -> Self {
        Self { x, y, z }
    }
}

/// Corner of the grid bbox that tile (0, 0) is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    /// South-west corner (TMS convention).
    #[default]
    LowerLeft,
    /// North-west corner (WMTS/XYZ convention).
    UpperLeft,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::LowerLeft => write!(f, "ll"),
            Origin::UpperLeft => write!(f, "ul"),
        }
    }
}

impl std::str::FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ll" | "sw" | "lower-left" | "lowerleft" => Ok(Origin::LowerLeft),
            "ul" | "nw" | "upper-left" | "upperleft" => Ok(Origin::UpperLeft),
            other => Err(format!("unknown origin '{}'", other)),
        }
    }
}

/// Axis-aligned bounding box in map units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BBox {
    /// Create a new bbox from its corners.
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    /// Returns `true` if the bbox has a positive, finite extent on both axes.
    pub fn is_valid(&self) -> bool {
        [self.minx, self.miny, self.maxx, self.maxy]
            .iter()
            .all(|v| v.is_finite())
            && self.minx < self.maxx
            && self.miny < self.maxy
    }

    /// Returns `true` if both boxes share a region of non-zero area.
    ///
    /// Boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.minx < other.maxx
            && self.maxx > other.minx
            && self.miny < other.maxy
            && self.maxy > other.miny
    }

    /// Returns `true` if `other` lies completely inside this bbox.
    pub fn contains(&self, other: &BBox) -> bool {
        self.minx <= other.minx
            && self.miny <= other.miny
            && self.maxx >= other.maxx
            && self.maxy >= other.maxy
    }

    /// Smallest bbox covering both boxes.
    pub fn merge(&self, other: &BBox) -> BBox {
        BBox {
            minx: self.minx.min(other.minx),
            miny: self.miny.min(other.miny),
            maxx: self.maxx.max(other.maxx),
            maxy: self.maxy.max(other.maxy),
        }
    }

    /// Compare two boxes, allowing `x_delta`/`y_delta` deviation per edge.
    pub fn equals_within(&self, other: &BBox, x_delta: f64, y_delta: f64) -> bool {
        (self.minx - other.minx).abs() <= x_delta
            && (self.maxx - other.maxx).abs() <= x_delta
            && (self.miny - other.miny).abs() <= y_delta
            && (self.maxy - other.maxy).abs() <= y_delta
    }

    /// Compare two boxes with a tolerance of one millionth of their extent.
    pub fn approx_eq(&self, other: &BBox) -> bool {
        let x_delta = self.width().abs() / 1_000_000.0;
        let y_delta = self.height().abs() / 1_000_000.0;
        self.equals_within(other, x_delta, y_delta)
    }

    /// Map units per pixel when this bbox is rendered at `size`.
    ///
    /// Uses the finer of the two axis resolutions so that non-square
    /// requests never select a level that is too coarse.
    pub fn resolution_for(&self, size: (u32, u32)) -> f64 {
        let w = self.width().abs() / size.0.max(1) as f64;
        let h = self.height().abs() / size.1.max(1) as f64;
        w.min(h)
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.minx, self.miny, self.maxx, self.maxy
        )
    }
}

impl From<(f64, f64, f64, f64)> for BBox {
    fn from((minx, miny, maxx, maxy): (f64, f64, f64, f64)) -> Self {
        Self::new(minx, miny, maxx, maxy)
    }
}

impl std::str::FromStr for BBox {
    type Err = String;

    /// Parse `"minx,miny,maxx,maxy"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid bbox '{}': {}", s, e))?;
        match parts.as_slice() {
            [minx, miny, maxx, maxy] => Ok(BBox::new(*minx, *miny, *maxx, *maxy)),
            _ => Err(format!("bbox '{}' needs exactly four values", s)),
        }
    }
}
