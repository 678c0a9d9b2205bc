use super::{low_pass::LowPassFilter, AxisFilter};
use std::f64::consts::PI;

/// One-euro filter: a low-pass whose cutoff rises with the signal's speed.
///
/// Slow jitter sees a cutoff near `min_cutoff` and is smoothed hard, fast
/// motion raises the cutoff by `beta × |speed|` so lag stays bounded.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    x_filter: LowPassFilter,
    dx_filter: LowPassFilter,
    last_raw: Option<f64>,
}

/// Smoothing factor of an exponential filter with the given cutoff at sample period `te`
fn smoothing_factor(te: f64, cutoff: f64) -> f64 {
    let r = 2.0 * PI * cutoff * te;
    r / (r + 1.0)
}

impl OneEuroFilter {
    /// Create a new one-euro filter
    ///
    /// # Panics
    ///
    /// Panics if a cutoff is not positive or beta is negative
    #[must_use]
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Self {
        assert!(min_cutoff > 0.0 && d_cutoff > 0.0, "Cutoff frequencies must be positive");
        assert!(beta >= 0.0, "Beta must not be negative");
        Self {
            min_cutoff,
            beta,
            d_cutoff,
            x_filter: LowPassFilter::new(1.0),
            dx_filter: LowPassFilter::new(1.0),
            last_raw: None,
        }
    }
}

impl AxisFilter for OneEuroFilter {
    fn filter(&mut self, value: f64, dt: f64) -> f64 {
        let dx = match self.last_raw {
            Some(prev) if dt > 0.0 => (value - prev) / dt,
            _ => 0.0,
        };
        self.last_raw = Some(value);

        let edx = self.dx_filter.apply_alpha(dx, smoothing_factor(dt, self.d_cutoff));
        let cutoff = self.beta.mul_add(edx.abs(), self.min_cutoff);
        self.x_filter.apply_alpha(value, smoothing_factor(dt, cutoff))
    }

    fn reset(&mut self) {
        self.x_filter.clear();
        self.dx_filter.clear();
        self.last_raw = None;
    }
}
