//! Control curves: break-point tables mapping a measured value to an allowed
//! current fraction.

use crate::error::CoreError;

/// Lookup mode shared by all curves of a battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurveMode {
    /// Interpolate between the two bracketing break-points.
    Linear,
    /// Piecewise-constant: no interpolation.
    #[default]
    Step,
}

/// Which break-point of the containing interval supplies the fraction in
/// step mode. Intervals are taken over x sorted ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEdge {
    /// Fraction of the interval's lower-x break-point.
    Lower,
    /// Fraction of the interval's upper-x break-point.
    Upper,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlCurve {
    xs: Vec<f64>,
    fractions: Vec<f64>,
    edge: StepEdge,
}

impl ControlCurve {
    /// Build a curve from parallel lists. `x` may be strictly ascending or
    /// strictly descending; it is stored ascending.
    pub fn new(x: &[f64], fraction: &[f64], edge: StepEdge) -> Result<Self, CoreError> {
        if x.len() != fraction.len() {
            return Err(CoreError::Curve(format!(
                "x has {} points but fraction has {}",
                x.len(),
                fraction.len()
            )));
        }
        if x.len() < 2 {
            return Err(CoreError::Curve("at least two break-points required".into()));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Curve("x values must be finite".into()));
        }
        if fraction
            .iter()
            .any(|f| !f.is_finite() || !(0.0..=1.0).contains(f))
        {
            return Err(CoreError::Curve("fractions must be within [0, 1]".into()));
        }
        let ascending = x.windows(2).all(|w| w[1] > w[0]);
        let descending = x.windows(2).all(|w| w[1] < w[0]);
        if !(ascending || descending) {
            return Err(CoreError::Curve(
                "x must be strictly monotonic".into(),
            ));
        }
        let mut xs = x.to_vec();
        let mut fractions = fraction.to_vec();
        if descending {
            xs.reverse();
            fractions.reverse();
        }
        Ok(Self {
            xs,
            fractions,
            edge,
        })
    }

    /// Allowed current fraction at `value`. Always within [0, 1]; NaN maps to 0.
    pub fn fraction(&self, value: f64, mode: CurveMode) -> f64 {
        if value.is_nan() {
            return 0.0;
        }
        let f = match mode {
            CurveMode::Linear => interpolate(value, &self.xs, &self.fractions),
            CurveMode::Step => self.step(value),
        };
        f.clamp(0.0, 1.0)
    }

    fn step(&self, value: f64) -> f64 {
        let last = self.xs.len() - 1;
        if value <= self.xs[0] {
            return self.fractions[0];
        }
        if value >= self.xs[last] {
            return self.fractions[last];
        }
        // First index whose x is strictly greater than value.
        let upper = self.xs.partition_point(|x| *x <= value);
        match self.edge {
            StepEdge::Lower => self.fractions[upper - 1],
            StepEdge::Upper => self.fractions[upper],
        }
    }
}

/// Piecewise-linear interpolation over ascending `xs`, clamped to the
/// endpoint values outside the range. Returns `ys[0]` for NaN input.
pub fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return 0.0;
    }
    if x.is_nan() || x <= xs[0] || n == 1 {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let hi = xs[..n].partition_point(|v| *v <= x);
    let lo = hi - 1;
    let span = xs[hi] - xs[lo];
    if span <= 0.0 {
        return ys[lo];
    }
    let t = (x - xs[lo]) / span;
    ys[lo] + t * (ys[hi] - ys[lo])
}
