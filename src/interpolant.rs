// Monotone piecewise cubic Hermite interpolation with inverse lookup.
//
// Integral tables are fitted with their exact node derivatives (the kernel
// times E - offset on the logarithmic table axis) and passed through the
// Fritsch-Carlson limiter, kernel tables use PCHIP slopes. Both keep monotone data monotone, which is
// what makes `find_limit` well defined.

use crate::error::PropagationError;

const LIMIT_ITERATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Interpolant {
    x: Vec<f64>,
    y: Vec<f64>,
    slopes: Vec<f64>,
}

fn validate_nodes(x: &[f64], y: &[f64]) -> Result<(), PropagationError> {
    if x.len() < 2 || x.len() != y.len() {
        return Err(PropagationError::InvalidConfiguration(format!(
            "interpolant needs at least two matching nodes, got {} x and {} y",
            x.len(),
            y.len()
        )));
    }
    if x.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(PropagationError::InvalidConfiguration(
            "interpolant nodes must be strictly increasing".to_string(),
        ));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(PropagationError::InvalidConfiguration(
            "interpolant nodes must be finite".to_string(),
        ));
    }
    Ok(())
}

impl Interpolant {
    /// Cubic Hermite fit with given node slopes, limited to stay monotone.
    pub fn hermite(x: Vec<f64>, y: Vec<f64>, slopes: Vec<f64>) -> Result<Self, PropagationError> {
        validate_nodes(&x, &y)?;
        if slopes.len() != x.len() || slopes.iter().any(|s| !s.is_finite()) {
            return Err(PropagationError::InvalidConfiguration(
                "interpolant slopes must be finite, one per node".to_string(),
            ));
        }
        let mut interpolant = Interpolant { x, y, slopes };
        interpolant.limit_slopes();
        Ok(interpolant)
    }

    /// Shape preserving fit (PCHIP) with slopes estimated from the data.
    pub fn pchip(x: Vec<f64>, y: Vec<f64>) -> Result<Self, PropagationError> {
        validate_nodes(&x, &y)?;
        let slopes = pchip_slopes(&x, &y);
        Ok(Interpolant { x, y, slopes })
    }

    /// Rebuild from stored parts without touching the slopes.
    pub fn from_parts(
        x: Vec<f64>,
        y: Vec<f64>,
        slopes: Vec<f64>,
    ) -> Result<Self, PropagationError> {
        validate_nodes(&x, &y)?;
        if slopes.len() != x.len() {
            return Err(PropagationError::InvalidConfiguration(
                "interpolant slopes must match the nodes".to_string(),
            ));
        }
        Ok(Interpolant { x, y, slopes })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.x
    }

    pub fn values(&self) -> &[f64] {
        &self.y
    }

    pub fn slopes(&self) -> &[f64] {
        &self.slopes
    }

    pub fn x_min(&self) -> f64 {
        self.x[0]
    }

    pub fn x_max(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    #[inline]
    fn segment(&self, x: f64) -> usize {
        let n = self.x.len();
        self.x.partition_point(|&v| v <= x).saturating_sub(1).min(n - 2)
    }

    /// Value at `x`; clamped to the end values outside the node range.
    pub fn value(&self, x: f64) -> f64 {
        if x <= self.x_min() {
            return self.y[0];
        }
        if x >= self.x_max() {
            return self.y[self.y.len() - 1];
        }
        let i = self.segment(x);
        self.eval_segment(i, x)
    }

    /// First derivative at `x`, zero outside the node range.
    pub fn derivative(&self, x: f64) -> f64 {
        if x < self.x_min() || x > self.x_max() {
            return 0.0;
        }
        let i = self.segment(x);
        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let h = x1 - x0;
        let s = (x - x0) / h;
        let dh00 = 6.0 * s * s - 6.0 * s;
        let dh10 = 3.0 * s * s - 4.0 * s + 1.0;
        let dh01 = -6.0 * s * s + 6.0 * s;
        let dh11 = 3.0 * s * s - 2.0 * s;
        (dh00 * self.y[i] + dh01 * self.y[i + 1]) / h
            + dh10 * self.slopes[i]
            + dh11 * self.slopes[i + 1]
    }

    #[inline]
    fn eval_segment(&self, i: usize, x: f64) -> f64 {
        let (x0, x1) = (self.x[i], self.x[i + 1]);
        let h = x1 - x0;
        let s = (x - x0) / h;
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        h00 * self.y[i]
            + h10 * h * self.slopes[i]
            + h01 * self.y[i + 1]
            + h11 * h * self.slopes[i + 1]
    }

    /// Inverse lookup on monotone data: the `x` where the curve meets `target`.
    ///
    /// Targets beyond the table range map to the nearest end node.
    pub fn find_limit(&self, target: f64) -> f64 {
        let n = self.x.len();
        let increasing = self.y[n - 1] >= self.y[0];
        let (first, last) = (self.y[0], self.y[n - 1]);
        let below_start = if increasing { target <= first } else { target >= first };
        let beyond_end = if increasing { target >= last } else { target <= last };
        if below_start {
            return self.x[0];
        }
        if beyond_end {
            return self.x[n - 1];
        }

        // first node at or past the target
        let k = if increasing {
            self.y.partition_point(|&v| v < target)
        } else {
            self.y.partition_point(|&v| v > target)
        };
        let i = k.saturating_sub(1).min(n - 2);
        self.solve_segment(i, target, increasing)
    }

    fn solve_segment(&self, i: usize, target: f64, increasing: bool) -> f64 {
        let (mut lo, mut hi) = (self.x[i], self.x[i + 1]);
        let (y0, y1) = (self.y[i], self.y[i + 1]);
        if y1 == y0 {
            return lo;
        }
        let scale = y0.abs().max(y1.abs()).max(target.abs());
        let mut x = lo + (hi - lo) * (target - y0) / (y1 - y0);

        for _ in 0..LIMIT_ITERATIONS {
            let residual = self.eval_segment(i, x) - target;
            if residual.abs() <= 4.0 * f64::EPSILON * scale {
                break;
            }
            // residual > 0 means x lies past the crossing on increasing data
            if (residual > 0.0) == increasing {
                hi = x;
            } else {
                lo = x;
            }
            if hi - lo <= 4.0 * f64::EPSILON * hi.abs().max(1.0) {
                break;
            }
            let slope = self.derivative(x);
            let newton = if slope != 0.0 { x - residual / slope } else { f64::NAN };
            x = if newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        }
        x
    }

    /// Fritsch-Carlson limiter for monotone data
    fn limit_slopes(&mut self) {
        let n = self.x.len();
        for i in 0..n - 1 {
            let h = self.x[i + 1] - self.x[i];
            let delta = (self.y[i + 1] - self.y[i]) / h;
            if delta == 0.0 {
                self.slopes[i] = 0.0;
                self.slopes[i + 1] = 0.0;
                continue;
            }
            if self.slopes[i] * delta < 0.0 {
                self.slopes[i] = 0.0;
            }
            if self.slopes[i + 1] * delta < 0.0 {
                self.slopes[i + 1] = 0.0;
            }
            let alpha = self.slopes[i] / delta;
            let beta = self.slopes[i + 1] / delta;
            let radius = alpha * alpha + beta * beta;
            if radius > 9.0 {
                let tau = 3.0 / radius.sqrt();
                self.slopes[i] = tau * alpha * delta;
                self.slopes[i + 1] = tau * beta * delta;
            }
        }
    }
}

fn pchip_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();
    if n == 2 {
        return vec![delta[0], delta[0]];
    }

    let mut slopes = vec![0.0; n];
    for k in 1..n - 1 {
        if delta[k - 1] * delta[k] > 0.0 {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            slopes[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }
    slopes[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    slopes[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);
    slopes
}

fn end_slope(h0: f64, h1: f64, d0: f64, d1: f64) -> f64 {
    let m = ((2.0 * h0 + h1) * d0 - h0 * d1) / (h0 + h1);
    if m * d0 <= 0.0 {
        0.0
    } else if d0 * d1 <= 0.0 && m.abs() > 3.0 * d0.abs() {
        3.0 * d0
    } else {
        m
    }
}
