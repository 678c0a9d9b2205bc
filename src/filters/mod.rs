//! Temporal smoothing of landmark positions.
//!
//! Each landmark coordinate runs through its own scalar [`AxisFilter`]; a
//! [`PointFilterBank`] holds one pair per landmark and exposes them as a
//! [`LandmarkFilter`]. Confidences are never filtered.

/// One-euro adaptive filter (default)
pub mod one_euro;

/// Fixed-alpha low-pass and critically damped spring filters
pub mod low_pass;

use crate::{
    config::FilterConfig,
    constants::DEFAULT_FPS,
    mark_detection::{Landmark, LandmarkSet},
    Error, Result,
};
use serde::{Deserialize, Serialize};

pub use low_pass::{CriticallyDampedFilter, LowPassFilter};
pub use one_euro::OneEuroFilter;

/// Scalar filter applied to one coordinate axis
pub trait AxisFilter: Clone + Send {
    /// Filter one sample taken `dt` seconds after the previous one.
    ///
    /// The first sample after construction or [`AxisFilter::reset`] is returned unchanged.
    fn filter(&mut self, value: f64, dt: f64) -> f64;

    /// Forget all history
    fn reset(&mut self);
}

/// Smoothing applied to a whole landmark set
pub trait LandmarkFilter: Send {
    /// Smooth a raw set observed `dt` seconds after the previous update
    fn update(&mut self, raw: &LandmarkSet, dt: f64) -> LandmarkSet;

    /// Forget all history; the next update returns its input unchanged
    fn reset(&mut self);

    /// Get filter name
    fn name(&self) -> &str;
}

/// Filter selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    #[default]
    OneEuro,
    LowPass,
    CriticallyDamped,
    None,
}

/// Time step used when the caller's `dt` is unusable
#[must_use]
pub fn sanitize_dt(dt: f64) -> f64 {
    if dt.is_finite() && dt > 0.0 {
        dt
    } else {
        1.0 / DEFAULT_FPS
    }
}

/// One x and one y filter per landmark, cloned from a prototype
pub struct PointFilterBank<F: AxisFilter> {
    name: &'static str,
    prototype: F,
    axes: Vec<(F, F)>,
}

impl<F: AxisFilter> PointFilterBank<F> {
    #[must_use]
    pub fn new(name: &'static str, prototype: F) -> Self {
        Self {
            name,
            prototype,
            axes: Vec::new(),
        }
    }
}

impl<F: AxisFilter> LandmarkFilter for PointFilterBank<F> {
    fn update(&mut self, raw: &LandmarkSet, dt: f64) -> LandmarkSet {
        if self.axes.len() != raw.len() {
            // Fresh filters seed themselves with this set
            self.axes = vec![(self.prototype.clone(), self.prototype.clone()); raw.len()];
        }
        let dt = sanitize_dt(dt);

        LandmarkSet::new(
            raw.iter()
                .zip(self.axes.iter_mut())
                .map(|(p, (fx, fy))| {
                    #[allow(clippy::cast_possible_truncation)]
                    let x = fx.filter(f64::from(p.x), dt) as f32;
                    #[allow(clippy::cast_possible_truncation)]
                    let y = fy.filter(f64::from(p.y), dt) as f32;
                    Landmark::new(x, y, p.confidence)
                })
                .collect(),
        )
    }

    fn reset(&mut self) {
        self.axes.clear();
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Passthrough filter
pub struct NoFilter;

impl LandmarkFilter for NoFilter {
    fn update(&mut self, raw: &LandmarkSet, _dt: f64) -> LandmarkSet {
        raw.clone()
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "NoFilter"
    }
}

/// Create a landmark filter from configuration
///
/// # Errors
///
/// Returns [`Error::FilterError`] if a parameter of the selected filter is out of range
pub fn create_filter(config: &FilterConfig) -> Result<Box<dyn LandmarkFilter>> {
    match config.kind {
        FilterKind::OneEuro => {
            if config.min_cutoff <= 0.0 || config.d_cutoff <= 0.0 || config.beta < 0.0 {
                return Err(Error::FilterError(format!(
                    "Invalid one-euro parameters: min_cutoff={}, beta={}, d_cutoff={}",
                    config.min_cutoff, config.beta, config.d_cutoff
                )));
            }
            Ok(Box::new(PointFilterBank::new(
                "OneEuroFilter",
                OneEuroFilter::new(config.min_cutoff, config.beta, config.d_cutoff),
            )))
        }
        FilterKind::LowPass => {
            if !(config.alpha > 0.0 && config.alpha <= 1.0) {
                return Err(Error::FilterError(format!("Alpha must be in (0, 1], got {}", config.alpha)));
            }
            Ok(Box::new(PointFilterBank::new("LowPassFilter", LowPassFilter::new(config.alpha))))
        }
        FilterKind::CriticallyDamped => {
            if config.halflife <= 0.0 {
                return Err(Error::FilterError(format!(
                    "Halflife must be positive, got {}",
                    config.halflife
                )));
            }
            Ok(Box::new(PointFilterBank::new(
                "CriticallyDampedFilter",
                CriticallyDampedFilter::new(config.halflife),
            )))
        }
        FilterKind::None => Ok(Box::new(NoFilter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(points: &[(f32, f32, f32)]) -> LandmarkSet {
        LandmarkSet::new(points.iter().map(|&(x, y, c)| Landmark::new(x, y, c)).collect())
    }

    #[test]
    fn test_no_filter() {
        let mut filter = NoFilter;
        let raw = set(&[(10.0, 20.0, 0.9)]);
        assert_eq!(filter.update(&raw, 0.033), raw);
    }

    #[test]
    fn test_create_filter() {
        for kind in [FilterKind::OneEuro, FilterKind::LowPass, FilterKind::CriticallyDamped, FilterKind::None] {
            let config = FilterConfig {
                kind,
                ..FilterConfig::default()
            };
            assert!(create_filter(&config).is_ok());
        }

        let config = FilterConfig {
            kind: FilterKind::LowPass,
            alpha: 1.5,
            ..FilterConfig::default()
        };
        assert!(create_filter(&config).is_err());
    }

    #[test]
    fn test_first_update_is_raw_for_every_kind() {
        for kind in [FilterKind::OneEuro, FilterKind::LowPass, FilterKind::CriticallyDamped, FilterKind::None] {
            let mut filter = create_filter(&FilterConfig {
                kind,
                ..FilterConfig::default()
            })
            .unwrap();
            let raw = set(&[(1.5, 2.5, 0.4), (100.25, -3.0, 1.0)]);
            assert_eq!(filter.update(&raw, 0.033), raw, "{}", filter.name());
        }
    }

    #[test]
    fn test_confidence_passes_through() {
        let mut filter = create_filter(&FilterConfig::default()).unwrap();
        filter.update(&set(&[(0.0, 0.0, 0.9)]), 0.033);
        let out = filter.update(&set(&[(10.0, 10.0, 0.1)]), 0.033);
        assert_eq!(out[0].confidence, 0.1);
        assert!(out[0].x < 10.0);
    }

    #[test]
    fn test_reset_reseeds() {
        let mut filter = create_filter(&FilterConfig::default()).unwrap();
        filter.update(&set(&[(0.0, 0.0, 1.0)]), 0.033);
        filter.update(&set(&[(5.0, 5.0, 1.0)]), 0.033);
        filter.reset();
        let raw = set(&[(50.0, 60.0, 1.0)]);
        assert_eq!(filter.update(&raw, 0.033), raw);
    }

    #[test]
    fn test_sanitize_dt() {
        assert_eq!(sanitize_dt(0.02), 0.02);
        assert_eq!(sanitize_dt(0.0), 1.0 / DEFAULT_FPS);
        assert_eq!(sanitize_dt(f64::NAN), 1.0 / DEFAULT_FPS);
    }
}
