//! Mapping between bounded (external) and unbounded (internal) parameters.
//!
//! The optimizer works on unconstrained internal values. Bounded parameters are
//! mapped with the MINUIT transforms:
//!
//! - both bounds: `x = lo + (sin(u) + 1) (hi - lo) / 2`
//! - lower only:  `x = lo - 1 + sqrt(u² + 1)`
//! - upper only:  `x = hi + 1 - sqrt(u² + 1)`
//!
//! so every internal value lands inside the bounds.

/// Bounds of one parameter; infinite values mean unbounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub fn unbounded() -> Self {
        Self::new(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn clamp(&self, x: f64) -> f64 {
        x.max(self.lower).min(self.upper)
    }

    /// External → internal. Values outside the bounds are clamped first.
    pub fn to_internal(&self, x: f64) -> f64 {
        let x = self.clamp(x);
        match (self.lower.is_finite(), self.upper.is_finite()) {
            (true, true) => (2.0 * (x - self.lower) / (self.upper - self.lower) - 1.0)
                .clamp(-1.0, 1.0)
                .asin(),
            (true, false) => ((x - self.lower + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            (false, true) => ((self.upper - x + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            (false, false) => x,
        }
    }

    /// Internal → external.
    pub fn to_external(&self, u: f64) -> f64 {
        match (self.lower.is_finite(), self.upper.is_finite()) {
            (true, true) => self.lower + (u.sin() + 1.0) * (self.upper - self.lower) / 2.0,
            (true, false) => self.lower - 1.0 + (u * u + 1.0).sqrt(),
            (false, true) => self.upper + 1.0 - (u * u + 1.0).sqrt(),
            (false, false) => u,
        }
    }

    /// `dx/du` at internal value `u`.
    pub fn gradient(&self, u: f64) -> f64 {
        match (self.lower.is_finite(), self.upper.is_finite()) {
            (true, true) => u.cos() * (self.upper - self.lower) / 2.0,
            (true, false) => u / (u * u + 1.0).sqrt(),
            (false, true) => -u / (u * u + 1.0).sqrt(),
            (false, false) => 1.0,
        }
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_invert_each_other() {
        let cases = [
            (Bounds::new(0.0, 10.0), 3.5),
            (Bounds::new(1.0, f64::INFINITY), 4.0),
            (Bounds::new(f64::NEG_INFINITY, -2.0), -7.0),
            (Bounds::unbounded(), 0.25),
        ];
        for (b, x) in cases {
            let back = b.to_external(b.to_internal(x));
            assert!((back - x).abs() < 1e-12, "{b:?}: {back} != {x}");
        }
    }

    #[test]
    fn any_internal_value_stays_inside() {
        let b = Bounds::new(-1.0, 2.0);
        for u in [-100.0, -3.0, 0.0, 1.3, 57.0] {
            let x = b.to_external(u);
            assert!((-1.0..=2.0).contains(&x));
        }
        let lo = Bounds::new(5.0, f64::INFINITY);
        assert!(lo.to_external(-30.0) >= 5.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let b = Bounds::new(0.0, 10.0);
        let u = 0.4;
        let h = 1e-6;
        let fd = (b.to_external(u + h) - b.to_external(u - h)) / (2.0 * h);
        assert!((fd - b.gradient(u)).abs() < 1e-6);
    }
}
