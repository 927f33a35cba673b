//! Spatial reference systems.
//!
//! A [`Srs`] is identified by its EPSG code. Only the properties the grid
//! geometry needs are modelled here: whether the system is geographic and
//! which bbox it spans by default. Reprojection is delegated to a
//! [`Reprojector`] implementation supplied by the caller.
//!
//! [`SrsRegistry`] is a bounded memoizing factory. Grids and managers that
//! share a registry share `Arc<Srs>` instances instead of parsing the same
//! code again.

use std::fmt;
use std::sync::Arc;

use moka::sync::Cache as MokaCache;
use thiserror::Error;

use crate::coord::BBox;

/// Semi-major axis of the spherical Mercator projection.
pub const SPHEROID_A: f64 = 6_378_137.0;

/// Default capacity of an [`SrsRegistry`].
pub const DEFAULT_REGISTRY_CAPACITY: u64 = 64;

/// Codes that are aliases of EPSG:3857.
const WEB_MERCATOR_ALIASES: [u32; 4] = [3857, 900913, 102100, 102113];

/// Geographic (lat/lon) codes.
const GEOGRAPHIC_CODES: [u32; 3] = [4326, 4258, 4269];

/// World extent of the spherical Mercator projection.
pub fn web_mercator_bbox() -> BBox {
    let offset = std::f64::consts::PI * SPHEROID_A;
    BBox::new(-offset, -offset, offset, offset)
}

/// World extent in geographic coordinates.
pub fn geographic_bbox() -> BBox {
    BBox::new(-180.0, -90.0, 180.0, 90.0)
}

/// Errors raised when resolving or transforming spatial references.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SrsError {
    /// The code could not be parsed.
    #[error("Invalid SRS code '{0}'")]
    InvalidCode(String),

    /// No transformation between the two systems is available.
    #[error("No transformation from {from} to {to}")]
    UnsupportedTransform { from: String, to: String },
}

/// A spatial reference system.
#[derive(Debug, Clone)]
pub struct Srs {
    code: String,
    epsg: u32,
}

impl Srs {
    /// Parse a code such as `EPSG:3857`, `epsg:4326` or `CRS:84`.
    pub fn from_code(code: &str) -> Result<Self, SrsError> {
        let normalized = code.trim().to_uppercase();
        if normalized == "CRS:84" {
            return Ok(Self {
                code: normalized,
                epsg: 4326,
            });
        }
        let number = normalized
            .strip_prefix("EPSG:")
            .unwrap_or(&normalized)
            .parse::<u32>()
            .map_err(|_| SrsError::InvalidCode(code.to_string()))?;
        Ok(Self {
            code: format!("EPSG:{}", number),
            epsg: number,
        })
    }

    /// Spherical Mercator (EPSG:900913 / EPSG:3857).
    pub fn web_mercator() -> Self {
        Self {
            code: "EPSG:900913".to_string(),
            epsg: 900913,
        }
    }

    /// WGS 84 geographic coordinates.
    pub fn wgs84() -> Self {
        Self {
            code: "EPSG:4326".to_string(),
            epsg: 4326,
        }
    }

    /// The normalized code string.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    /// Returns `true` for geographic (degree based) systems.
    pub fn is_geographic(&self) -> bool {
        GEOGRAPHIC_CODES.contains(&self.epsg)
    }

    /// Returns `true` for any alias of the spherical Mercator projection.
    pub fn is_web_mercator(&self) -> bool {
        WEB_MERCATOR_ALIASES.contains(&self.epsg)
    }

    /// Returns `true` if both systems describe the same coordinates.
    pub fn is_equivalent(&self, other: &Srs) -> bool {
        self.epsg == other.epsg || (self.is_web_mercator() && other.is_web_mercator())
    }

    /// Default world extent, if known for this system.
    pub fn default_bbox(&self) -> Option<BBox> {
        if self.is_geographic() {
            Some(geographic_bbox())
        } else if self.is_web_mercator() {
            Some(web_mercator_bbox())
        } else {
            None
        }
    }
}

impl PartialEq for Srs {
    fn eq(&self, other: &Self) -> bool {
        self.is_equivalent(other)
    }
}

impl fmt::Display for Srs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Memoizing factory for [`Srs`] instances.
///
/// Bounded by entry count; evicted entries are simply parsed again on the
/// next lookup. Create one per application and pass it by reference.
pub struct SrsRegistry {
    cache: MokaCache<String, Arc<Srs>>,
}

impl SrsRegistry {
    /// Create a registry holding at most `capacity` systems.
    pub fn new(capacity: u64) -> Self {
        Self {
            cache: MokaCache::builder().max_capacity(capacity).build(),
        }
    }

    /// Look up (or parse and remember) the system for `code`.
    pub fn get(&self, code: &str) -> Result<Arc<Srs>, SrsError> {
        let key = code.trim().to_uppercase();
        self.cache
            .try_get_with(key, || Srs::from_code(code).map(Arc::new))
            .map_err(|e| (*e).clone())
    }

    /// Number of systems currently memoized.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SrsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

/// Transforms bounding boxes between spatial reference systems.
///
/// The projection math itself lives outside this crate; implementations
/// wrap whatever projection library the deployment uses.
pub trait Reprojector: Send + Sync + fmt::Debug {
    /// Transform `bbox` from `from` into `to`.
    fn transform_bbox(&self, bbox: BBox, from: &Srs, to: &Srs) -> Result<BBox, SrsError>;
}

/// Reprojector that only accepts equivalent systems.
#[derive(Debug, Default, Clone, Copy)]
pub struct EquivalentOnly;

impl Reprojector for EquivalentOnly {
    fn transform_bbox(&self, bbox: BBox, from: &Srs, to: &Srs) -> Result<BBox, SrsError> {
        if from.is_equivalent(to) {
            Ok(bbox)
        } else {
            Err(SrsError::UnsupportedTransform {
                from: from.code().to_string(),
                to: to.code().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_codes() {
        assert_eq!(Srs::from_code("epsg:3857").unwrap().code(), "EPSG:3857");
        assert_eq!(Srs::from_code("4326").unwrap().epsg(), 4326);
        assert!(Srs::from_code("CRS:84").unwrap().is_geographic());
        assert!(matches!(
            Srs::from_code("EPSG:abc"),
            Err(SrsError::InvalidCode(_))
        ));
    }

    #[test]
    fn test_mercator_aliases_are_equivalent() {
        let a = Srs::from_code("EPSG:900913").unwrap();
        let b = Srs::from_code("EPSG:3857").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Srs::wgs84());
    }

    #[test]
    fn test_default_bbox() {
        let bbox = Srs::web_mercator().default_bbox().unwrap();
        assert!((bbox.maxx - 20037508.342789244).abs() < 1e-6);
        assert_eq!(
            Srs::wgs84().default_bbox().unwrap(),
            BBox::new(-180.0, -90.0, 180.0, 90.0)
        );
        assert!(Srs::from_code("EPSG:25832").unwrap().default_bbox().is_none());
    }

    #[test]
    fn test_registry_memoizes() {
        let registry = SrsRegistry::new(8);
        let a = registry.get("EPSG:4326").unwrap();
        let b = registry.get("epsg:4326").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_propagates_errors() {
        let registry = SrsRegistry::default();
        assert!(registry.get("nonsense").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_equivalent_only_reprojector() {
        let bbox = BBox::new(0.0, 0.0, 1.0, 1.0);
        let merc = Srs::web_mercator();
        let alias = Srs::from_code("EPSG:3857").unwrap();
        assert_eq!(EquivalentOnly.transform_bbox(bbox, &alias, &merc), Ok(bbox));
        assert!(EquivalentOnly
            .transform_bbox(bbox, &Srs::wgs84(), &merc)
            .is_err());
    }
}
