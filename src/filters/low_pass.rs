use super::AxisFilter;

/// First-order low-pass filter
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    alpha: f64,
    last: Option<f64>,
}

impl LowPassFilter {
    /// Create a new first-order low-pass filter
    ///
    /// # Panics
    ///
    /// Panics if alpha is not in the range (0, 1]
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        assert!(alpha > 0.0 && alpha <= 1.0, "Alpha must be in (0, 1]");
        Self { alpha, last: None }
    }

    /// Blend `value` into the state with an explicit smoothing factor
    pub(crate) fn apply_alpha(&mut self, value: f64, alpha: f64) -> f64 {
        let filtered = match self.last {
            Some(last) => alpha.mul_add(value - last, last),
            None => value,
        };
        self.last = Some(filtered);
        filtered
    }

    pub(crate) fn clear(&mut self) {
        self.last = None;
    }
}

impl AxisFilter for LowPassFilter {
    fn filter(&mut self, value: f64, _dt: f64) -> f64 {
        self.apply_alpha(value, self.alpha)
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// Critically damped spring (ζ = 1) tracking the input.
///
/// Parameterized by the halflife in seconds for the distance to the target to
/// halve. Uses the closed-form step, so it is stable for any `dt`.
#[derive(Debug, Clone)]
pub struct CriticallyDampedFilter {
    halflife: f64,
    x: f64,
    dx: f64,
    initialized: bool,
}

impl CriticallyDampedFilter {
    /// Create a new critically damped filter
    ///
    /// # Panics
    ///
    /// Panics if halflife is not positive
    #[must_use]
    pub fn new(halflife: f64) -> Self {
        assert!(halflife > 0.0, "Halflife must be positive");
        Self {
            halflife,
            x: 0.0,
            dx: 0.0,
            initialized: false,
        }
    }
}

impl AxisFilter for CriticallyDampedFilter {
    fn filter(&mut self, value: f64, dt: f64) -> f64 {
        if !self.initialized {
            self.x = value;
            self.dx = 0.0;
            self.initialized = true;
            return value;
        }

        let y = 2.0 * std::f64::consts::LN_2 / self.halflife;
        let j0 = self.x - value;
        let j1 = j0.mul_add(y, self.dx);
        let eydt = (-y * dt).exp();

        self.x = eydt.mul_add(j1.mul_add(dt, j0), value);
        self.dx = eydt * (-j1 * y).mul_add(dt, self.dx);
        self.x
    }

    fn reset(&mut self) {
        self.x = 0.0;
        self.dx = 0.0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_order_low_pass() {
        let mut filter = LowPassFilter::new(0.5);

        // First value passes through
        assert_eq!(filter.filter(10.0, 0.033), 10.0);

        // Second value is filtered
        assert_eq!(filter.filter(20.0, 0.033), 15.0); // 10 + 0.5 * (20 - 10)
    }

    #[test]
    #[should_panic(expected = "Alpha must be in (0, 1]")]
    fn test_low_pass_rejects_zero_alpha() {
        let _ = LowPassFilter::new(0.0);
    }

    #[test]
    fn test_critically_damped_step_response() {
        let mut filter = CriticallyDampedFilter::new(0.05);
        filter.filter(0.0, 0.033);

        // Approaches the target monotonically without overshoot
        let mut last = 0.0;
        for _ in 0..60 {
            let x = filter.filter(10.0, 1.0 / 60.0);
            assert!(x >= last);
            assert!(x <= 10.0);
            last = x;
        }
        assert!((last - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_critically_damped_halflife() {
        let mut filter = CriticallyDampedFilter::new(0.1);
        filter.filter(0.0, 0.0);
        // Starting at rest the spring covers less than half the distance in one halflife
        let x = filter.filter(1.0, 0.1);
        assert!(x > 0.0 && x < 0.5);
    }

    #[test]
    fn test_critically_damped_holds_constant() {
        let mut filter = CriticallyDampedFilter::new(0.05);
        for _ in 0..10 {
            assert_eq!(filter.filter(3.25, 0.033), 3.25);
        }
    }
}
