//! Resolution pyramid generation and level selection.

use crate::coord::BBox;

use super::error::GridError;

/// Default number of levels for factor based pyramids.
pub const DEFAULT_NUM_LEVELS: usize = 20;

/// Default number of levels for √2 pyramids.
pub const DEFAULT_SQRT2_NUM_LEVELS: usize = 40;

/// Default stretch factor.
pub const DEFAULT_STRETCH_FACTOR: f64 = 1.15;

/// Default max shrink factor.
pub const DEFAULT_MAX_SHRINK_FACTOR: f64 = 4.0;

/// Ratio between two neighbouring levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResFactor {
    Value(f64),
    Sqrt2,
}

impl ResFactor {
    pub fn value(&self) -> f64 {
        match self {
            ResFactor::Value(v) => *v,
            ResFactor::Sqrt2 => std::f64::consts::SQRT_2,
        }
    }

    fn default_levels(&self) -> usize {
        match self {
            ResFactor::Sqrt2 => DEFAULT_SQRT2_NUM_LEVELS,
            ResFactor::Value(_) => DEFAULT_NUM_LEVELS,
        }
    }
}

impl Default for ResFactor {
    fn default() -> Self {
        ResFactor::Value(2.0)
    }
}

impl std::str::FromStr for ResFactor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("sqrt2") {
            return Ok(ResFactor::Sqrt2);
        }
        s.parse::<f64>()
            .map(ResFactor::Value)
            .map_err(|_| format!("expected a number or 'sqrt2', got '{}'", s))
    }
}

/// How the resolutions of a grid are derived.
///
/// Exactly one scheme is used per grid.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionScheme {
    /// Use these resolutions as given.
    Explicit(Vec<f64>),

    /// Start at the resolution that fits the bbox into one tile and divide
    /// by `factor` for each further level.
    Factor {
        factor: ResFactor,
        num_levels: Option<usize>,
    },

    /// Resolutions between `min_res` (the coarsest level) and `max_res`
    /// (the finest level).
    ///
    /// With both `max_res` and `num_levels` the levels are spaced evenly on a
    /// log scale. With `max_res` only, `factor` steps are taken until
    /// `max_res` is reached. Without `max_res`, `num_levels` levels are
    /// generated by `factor`. `min_res` defaults to the resolution that fits
    /// the bbox into one tile.
    Range {
        min_res: Option<f64>,
        max_res: Option<f64>,
        num_levels: Option<usize>,
        factor: ResFactor,
    },
}

impl Default for ResolutionScheme {
    fn default() -> Self {
        ResolutionScheme::Factor {
            factor: ResFactor::default(),
            num_levels: None,
        }
    }
}

impl ResolutionScheme {
    /// Produce the resolution sequence for a grid over `bbox`.
    pub fn generate(&self, bbox: &BBox, tile_size: (u32, u32)) -> Result<Vec<f64>, GridError> {
        let full_res = (bbox.width() / tile_size.0 as f64).max(bbox.height() / tile_size.1 as f64);

        let res = match self {
            ResolutionScheme::Explicit(res) => res.clone(),
            ResolutionScheme::Factor { factor, num_levels } => {
                let levels = num_levels.unwrap_or_else(|| factor.default_levels());
                by_factor(full_res, factor.value(), levels)
            }
            ResolutionScheme::Range {
                min_res,
                max_res,
                num_levels,
                factor,
            } => {
                let start = min_res.unwrap_or(full_res);
                match (max_res, num_levels) {
                    (Some(max_res), Some(levels)) => log_spaced(start, *max_res, *levels),
                    (Some(max_res), None) => {
                        if factor.value() <= 1.0 {
                            return Err(GridError::Config(
                                "res_factor must be greater than 1".to_string(),
                            ));
                        }
                        until(start, *max_res, factor.value())
                    }
                    (None, levels) => {
                        let levels = levels.unwrap_or_else(|| factor.default_levels());
                        by_factor(start, factor.value(), levels)
                    }
                }
            }
        };

        validate(&res)?;
        Ok(res)
    }
}

pub(super) fn by_factor(initial: f64, factor: f64, levels: usize) -> Vec<f64> {
    (0..levels).map(|n| initial / factor.powi(n as i32)).collect()
}

fn log_spaced(min_res: f64, max_res: f64, levels: usize) -> Vec<f64> {
    if levels <= 1 {
        return vec![min_res];
    }
    let step = (min_res.log10() - max_res.log10()) / (levels - 1) as f64;
    (0..levels)
        .map(|i| 10f64.powf(min_res.log10() - step * i as f64))
        .collect()
}

fn until(min_res: f64, max_res: f64, factor: f64) -> Vec<f64> {
    let mut res = vec![min_res];
    // Tolerance keeps rounding noise from adding a level just past max_res.
    while let Some(&last) = res.last() {
        if last <= max_res * (1.0 + 1e-9) {
            break;
        }
        res.push(last / factor);
    }
    res
}

fn validate(res: &[f64]) -> Result<(), GridError> {
    if res.is_empty() {
        return Err(GridError::Config("grid needs at least one resolution".to_string()));
    }
    if let Some(bad) = res.iter().find(|r| !r.is_finite() || **r <= 0.0) {
        return Err(GridError::Config(format!("invalid resolution {}", bad)));
    }
    if let Some(pair) = res.windows(2).find(|w| w[0] <= w[1]) {
        return Err(GridError::Config(format!(
            "resolutions must be strictly decreasing ({} is followed by {})",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

/// Select the level to serve a request of resolution `res`.
///
/// Returns the coarsest level whose resolution is at most
/// `res * stretch_factor`. When several levels are closer together than the
/// stretch factor, the finer one wins only once it is no finer than `res`.
///
/// `threshold_res` (sorted ascending) defines hard cut-points: for a
/// threshold `t` between two levels, requests coarser than `t` use the
/// coarser level and all others the finer level, regardless of the stretch
/// factor.
///
/// Requests coarser than level 0 select level 0; requests finer than the
/// last level select the last level.
pub fn closest_level(
    resolutions: &[f64],
    res: f64,
    threshold_res: &[f64],
    stretch_factor: f64,
) -> usize {
    let Some(&first) = resolutions.first() else {
        return 0;
    };
    let mut prev_l_res = first;

    // Largest thresholds first; skip those above the first level.
    let mut thresholds: Vec<f64> = threshold_res.to_vec();
    let mut threshold = thresholds.pop();
    while let Some(t) = threshold {
        if t > prev_l_res && !thresholds.is_empty() {
            threshold = thresholds.pop();
        } else {
            break;
        }
    }

    let mut threshold_result: Option<usize> = None;
    for (level, &l_res) in resolutions.iter().enumerate() {
        if let Some(t) = threshold {
            if prev_l_res > t && t >= l_res {
                if res > t {
                    return level.saturating_sub(1);
                } else if res >= l_res {
                    return level;
                }
                threshold = thresholds.pop();
            }
        }

        if let Some(result) = threshold_result {
            if l_res < res {
                return result;
            }
        }

        if l_res <= res * stretch_factor {
            threshold_result = Some(level);
        }
        prev_l_res = l_res;
    }
    resolutions.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mercator_bbox() -> BBox {
        let o = std::f64::consts::PI * 6378137.0;
        BBox::new(-o, -o, o, o)
    }

    #[test]
    fn test_default_factor_scheme() {
        let res = ResolutionScheme::default()
            .generate(&mercator_bbox(), (256, 256))
            .unwrap();
        assert_eq!(res.len(), 20);
        assert!((res[0] - 156543.03392804097).abs() < 1e-6);
        assert!((res[1] - res[0] / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_sqrt2_scheme_defaults_to_40_levels() {
        let scheme = ResolutionScheme::Factor {
            factor: ResFactor::Sqrt2,
            num_levels: None,
        };
        let res = scheme.generate(&mercator_bbox(), (256, 256)).unwrap();
        assert_eq!(res.len(), 40);
        assert!((res[0] / res[2] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_with_levels_is_log_spaced() {
        let scheme = ResolutionScheme::Range {
            min_res: Some(1000.0),
            max_res: Some(10.0),
            num_levels: Some(3),
            factor: ResFactor::default(),
        };
        let res = scheme.generate(&mercator_bbox(), (256, 256)).unwrap();
        assert_eq!(res.len(), 3);
        assert!((res[0] - 1000.0).abs() < 1e-6);
        assert!((res[1] - 100.0).abs() < 1e-6);
        assert!((res[2] - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_range_until_max_res() {
        let scheme = ResolutionScheme::Range {
            min_res: Some(1000.0),
            max_res: Some(125.0),
            num_levels: None,
            factor: ResFactor::Value(2.0),
        };
        let res = scheme.generate(&mercator_bbox(), (256, 256)).unwrap();
        assert_eq!(res, vec![1000.0, 500.0, 250.0, 125.0]);
    }

    #[test]
    fn test_explicit_must_decrease() {
        let scheme = ResolutionScheme::Explicit(vec![10.0, 10.0, 5.0]);
        assert!(matches!(
            scheme.generate(&mercator_bbox(), (256, 256)),
            Err(GridError::Config(_))
        ));
        let scheme = ResolutionScheme::Explicit(vec![]);
        assert!(scheme.generate(&mercator_bbox(), (256, 256)).is_err());
        let scheme = ResolutionScheme::Explicit(vec![10.0, -1.0]);
        assert!(scheme.generate(&mercator_bbox(), (256, 256)).is_err());
    }

    #[test]
    fn test_res_factor_from_str() {
        assert_eq!("sqrt2".parse::<ResFactor>().unwrap(), ResFactor::Sqrt2);
        assert_eq!("1.5".parse::<ResFactor>().unwrap(), ResFactor::Value(1.5));
        assert!("fast".parse::<ResFactor>().is_err());
    }

    #[test]
    fn test_closest_level_exact_and_stretched() {
        let res = [1000.0, 500.0, 250.0, 125.0];
        assert_eq!(closest_level(&res, 1000.0, &[], 1.15), 0);
        assert_eq!(closest_level(&res, 500.0, &[], 1.15), 1);
        // 450 * 1.15 = 517.5 >= 500, so level 1 is acceptable
        assert_eq!(closest_level(&res, 450.0, &[], 1.15), 1);
        // 400 * 1.15 = 460 < 500, level 2 needed
        assert_eq!(closest_level(&res, 400.0, &[], 1.15), 2);
    }

    #[test]
    fn test_closest_level_boundaries() {
        let res = [1000.0, 500.0, 250.0];
        assert_eq!(closest_level(&res, 1_000_000.0, &[], 1.15), 0);
        assert_eq!(closest_level(&res, 0.001, &[], 1.15), 2);
    }

    #[test]
    fn test_closest_level_with_thresholds() {
        let res = [1000.0, 500.0, 250.0];
        let thresholds = [700.0];
        // 800 * 1.15 = 920 < 1000, so level 1 without thresholds
        assert_eq!(closest_level(&res, 800.0, &[], 1.15), 1);
        // With threshold 700, anything coarser than 700 stays at level 0
        assert_eq!(closest_level(&res, 800.0, &thresholds, 1.15), 0);
        assert_eq!(closest_level(&res, 700.0, &thresholds, 1.15), 1);
        assert_eq!(closest_level(&res, 600.0, &thresholds, 1.15), 1);
    }

    #[test]
    fn test_closest_level_close_resolutions() {
        // Levels closer together than the stretch factor
        let res = [1000.0, 950.0, 900.0, 500.0];
        assert_eq!(closest_level(&res, 1000.0, &[], 1.15), 0);
        assert_eq!(closest_level(&res, 950.0, &[], 1.15), 1);
        assert_eq!(closest_level(&res, 920.0, &[], 1.15), 1);
        assert_eq!(closest_level(&res, 900.0, &[], 1.15), 2);
    }
}
