// Adaptive Romberg quadrature and the inverse limit search built on it.
//
// Integrals over energy are taken in t = ln E, so a range of many decades is
// split into per-decade chunks and each chunk is integrated by Romberg
// extrapolation. A chunk that does not converge is bisected.

use crate::error::PropagationError;

/// Relative precision targeted by the quadrature
pub const INTEGRAL_PRECISION: f64 = 1e-9;

/// Smallest Romberg level at which convergence is accepted
const ROMBERG_ORDER: usize = 5;
const MAX_REFINEMENTS: usize = 10;
const MAX_SPLIT_DEPTH: usize = 30;
const MAX_LIMIT_STEPS: usize = 200;

/// Quadrature settings. Cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integral {
    pub precision: f64,
    pub order: usize,
    pub max_refinements: usize,
    pub max_depth: usize,
}

impl Default for Integral {
    fn default() -> Self {
        Integral {
            precision: INTEGRAL_PRECISION,
            order: ROMBERG_ORDER,
            max_refinements: MAX_REFINEMENTS,
            max_depth: MAX_SPLIT_DEPTH,
        }
    }
}

#[inline]
fn checked<G: Fn(f64) -> f64>(g: &G, t: f64) -> Result<f64, String> {
    let value = g(t);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("non-finite integrand ({}) at {:e}", value, t))
    }
}

impl Integral {
    /// Integrate `f` over `[lower, upper]` in the plain variable.
    ///
    /// Reversed limits give the negated integral.
    pub fn integrate<F: Fn(f64) -> f64>(
        &self,
        f: F,
        lower: f64,
        upper: f64,
    ) -> Result<f64, PropagationError> {
        if lower == upper {
            return Ok(0.0);
        }
        if !lower.is_finite() || !upper.is_finite() {
            return Err(PropagationError::integration(lower, upper, "infinite limit"));
        }
        let (a, b, sign) = if lower < upper {
            (lower, upper, 1.0)
        } else {
            (upper, lower, -1.0)
        };
        self.integrate_chunked(&f, a, b, None)
            .map(|v| sign * v)
            .map_err(|reason| PropagationError::integration(lower, upper, reason))
    }

    /// Integrate `f(E) dE` over `[lower, upper]` using `E = e^t`.
    ///
    /// Both limits must be positive. Reversed limits give the negated integral.
    pub fn integrate_log<F: Fn(f64) -> f64>(
        &self,
        f: F,
        lower: f64,
        upper: f64,
    ) -> Result<f64, PropagationError> {
        if lower == upper {
            return Ok(0.0);
        }
        if !(lower > 0.0 && upper > 0.0) || !lower.is_finite() || !upper.is_finite() {
            return Err(PropagationError::integration(
                lower,
                upper,
                "logarithmic substitution needs finite positive limits",
            ));
        }
        let (a, b, sign) = if lower < upper {
            (lower.ln(), upper.ln(), 1.0)
        } else {
            (upper.ln(), lower.ln(), -1.0)
        };
        let g = |t: f64| {
            let e = t.exp();
            f(e) * e
        };
        self.integrate_chunked(&g, a, b, Some(std::f64::consts::LN_10))
            .map(|v| sign * v)
            .map_err(|reason| PropagationError::integration(lower, upper, reason))
    }

    /// Find `E` in `[floor, upper]` with `∫_E^upper f = target` for `f >= 0`.
    ///
    /// Returns `None` when the whole range down to `floor` holds less than
    /// `target`. The search is a safeguarded Newton iteration in `ln E`,
    /// integrating only the increment between successive iterates.
    pub fn lower_limit<F: Fn(f64) -> f64>(
        &self,
        f: F,
        upper: f64,
        target: f64,
        floor: f64,
    ) -> Result<Option<f64>, PropagationError> {
        if target <= 0.0 {
            return Ok(Some(upper));
        }
        if floor >= upper {
            return Ok(None);
        }
        let total = self.integrate_log(&f, floor, upper)?;
        self.lower_limit_within(f, upper, target, floor, total)
    }

    /// [`Integral::lower_limit`] with `total = ∫_floor^upper f` already known.
    pub fn lower_limit_within<F: Fn(f64) -> f64>(
        &self,
        f: F,
        upper: f64,
        target: f64,
        floor: f64,
        total: f64,
    ) -> Result<Option<f64>, PropagationError> {
        if target <= 0.0 {
            return Ok(Some(upper));
        }
        if floor >= upper || !(total > target) {
            return Ok(None);
        }

        // g(t) = ∫_{e^t}^{upper} f - target decreases in t
        let mut lo = floor.ln();
        let mut hi = upper.ln();
        let mut t_ref = hi;
        let mut g_ref = -target;
        let mut t = hi - (hi - lo) * target / total;
        let tolerance = 10.0 * self.precision * target;

        for _ in 0..MAX_LIMIT_STEPS {
            let g_t = g_ref + self.integrate_log(&f, t.exp(), t_ref.exp())?;
            if g_t.abs() <= tolerance {
                return Ok(Some(t.exp().clamp(floor, upper)));
            }
            if g_t > 0.0 {
                lo = t;
            } else {
                hi = t;
            }
            if hi - lo <= 4.0 * f64::EPSILON * hi.abs().max(1.0) {
                return Ok(Some(t.exp().clamp(floor, upper)));
            }
            t_ref = t;
            g_ref = g_t;

            let e = t.exp();
            let slope = -f(e) * e;
            let newton = if slope < 0.0 && slope.is_finite() {
                t - g_t / slope
            } else {
                f64::NAN
            };
            t = if newton > lo && newton < hi {
                newton
            } else {
                0.5 * (lo + hi)
            };
        }
        Err(PropagationError::integration(
            floor,
            upper,
            "limit search did not converge",
        ))
    }

    fn integrate_chunked<G: Fn(f64) -> f64>(
        &self,
        g: &G,
        a: f64,
        b: f64,
        chunk: Option<f64>,
    ) -> Result<f64, String> {
        let n = match chunk {
            Some(width) => ((b - a) / width).ceil().max(1.0) as usize,
            None => 1,
        };
        let width = (b - a) / n as f64;

        // coarse trapezoid pass sets the absolute tolerance floor
        let mut coarse = 0.0;
        for i in 0..n {
            let lo = a + i as f64 * width;
            coarse += self.trapezoid(g, lo, lo + width, 8)?;
        }
        let abs_tol = self.precision * coarse.abs() / n as f64;

        let mut sum = 0.0;
        for i in 0..n {
            let lo = a + i as f64 * width;
            let hi = if i + 1 == n { b } else { lo + width };
            sum += self.adaptive(g, lo, hi, abs_tol, 0)?;
        }
        Ok(sum)
    }

    fn trapezoid<G: Fn(f64) -> f64>(
        &self,
        g: &G,
        a: f64,
        b: f64,
        intervals: usize,
    ) -> Result<f64, String> {
        let h = (b - a) / intervals as f64;
        let mut sum = 0.5 * (checked(g, a)? + checked(g, b)?);
        for i in 1..intervals {
            sum += checked(g, a + i as f64 * h)?;
        }
        Ok(sum * h)
    }

    fn adaptive<G: Fn(f64) -> f64>(
        &self,
        g: &G,
        a: f64,
        b: f64,
        abs_tol: f64,
        depth: usize,
    ) -> Result<f64, String> {
        let (estimate, converged) = self.romberg(g, a, b, abs_tol)?;
        if converged {
            return Ok(estimate);
        }
        if depth >= self.max_depth {
            return Err(format!(
                "romberg quadrature did not converge after {} bisections",
                depth
            ));
        }
        let mid = 0.5 * (a + b);
        Ok(self.adaptive(g, a, mid, 0.5 * abs_tol, depth + 1)?
            + self.adaptive(g, mid, b, 0.5 * abs_tol, depth + 1)?)
    }

    fn romberg<G: Fn(f64) -> f64>(
        &self,
        g: &G,
        a: f64,
        b: f64,
        abs_tol: f64,
    ) -> Result<(f64, bool), String> {
        let h0 = b - a;
        let mut previous = vec![0.5 * h0 * (checked(g, a)? + checked(g, b)?)];
        let mut intervals = 1usize;

        for level in 1..=self.max_refinements {
            let h = h0 / (2 * intervals) as f64;
            let mut midpoints = 0.0;
            for i in 0..intervals {
                midpoints += checked(g, a + (2 * i + 1) as f64 * h)?;
            }
            intervals *= 2;

            let mut row = Vec::with_capacity(level + 1);
            row.push(0.5 * previous[0] + h * midpoints);
            let mut factor = 1.0;
            for j in 1..=level {
                factor *= 4.0;
                let extrapolated = row[j - 1] + (row[j - 1] - previous[j - 1]) / (factor - 1.0);
                row.push(extrapolated);
            }

            let estimate = row[level];
            let change = (estimate - previous[level - 1]).abs();
            if level + 1 >= self.order && change <= (self.precision * estimate.abs()).max(abs_tol)
            {
                return Ok((estimate, true));
            }
            previous = row;
        }
        Ok((previous[self.max_refinements], false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_x_over_many_decades() {
        let integral = Integral::default();
        for (lo_exp, hi_exp) in [(0, 1), (0, 14), (-3, 5), (2, 9)] {
            let lo = 10f64.powi(lo_exp);
            let hi = 10f64.powi(hi_exp);
            let result = integral.integrate_log(|x| 1.0 / x, lo, hi).unwrap();
            let expected = (hi / lo).ln();
            assert!(
                ((result - expected) / expected).abs() < 1e-5,
                "∫1/x on [{}, {}] = {} expected {}",
                lo,
                hi,
                result,
                expected
            );
        }
    }

    #[test]
    fn test_reversed_limits_change_sign() {
        let integral = Integral::default();
        let forward = integral.integrate_log(|x| x.sqrt(), 1.0, 100.0).unwrap();
        let backward = integral.integrate_log(|x| x.sqrt(), 100.0, 1.0).unwrap();
        assert!((forward + backward).abs() < 1e-9 * forward);
        let expected = 2.0 / 3.0 * (1000.0 - 1.0);
        assert!(((forward - expected) / expected).abs() < 1e-8);
    }

    #[test]
    fn test_linear_variable_polynomial_and_kink() {
        let integral = Integral::default();
        let cubic = integral.integrate(|x| x * x, 0.0, 3.0).unwrap();
        assert!((cubic - 9.0).abs() < 1e-10);
        // the kink at 1 forces bisection
        let kink = integral.integrate(|x: f64| (x - 1.0).abs(), 0.0, 2.3).unwrap();
        assert!((kink - 1.345).abs() < 1e-7, "kink integral = {}", kink);
    }

    #[test]
    fn test_non_finite_integrand_fails() {
        let integral = Integral::default();
        let err = integral.integrate_log(|_| 1.0 / 0.0, 1.0, 10.0).unwrap_err();
        assert!(matches!(err, PropagationError::IntegrationFailure { .. }));
        assert!(integral.integrate_log(|x| x, -1.0, 10.0).is_err());
    }

    #[test]
    fn test_zero_integrand() {
        let integral = Integral::default();
        assert_eq!(integral.integrate_log(|_| 0.0, 1.0, 1e10).unwrap(), 0.0);
    }

    #[test]
    fn test_lower_limit_matches_analytic() {
        let integral = Integral::default();
        // ∫_x^E 1/e de = ln(E/x) = tau
        for tau in [1e-3, 0.5, 3.0, 20.0] {
            let upper = 1e10;
            let limit = integral
                .lower_limit(|x| 1.0 / x, upper, tau, 1.0)
                .unwrap()
                .unwrap();
            let expected = upper * (-tau).exp();
            assert!(
                ((limit - expected) / expected).abs() < 1e-7,
                "tau {} gave {} expected {}",
                tau,
                limit,
                expected
            );
        }
    }

    #[test]
    fn test_lower_limit_insufficient_range() {
        let integral = Integral::default();
        // ln(100) < 5
        assert_eq!(integral.lower_limit(|x| 1.0 / x, 100.0, 5.0, 1.0).unwrap(), None);
        assert_eq!(integral.lower_limit(|_| 0.0, 100.0, 0.1, 1.0).unwrap(), None);
        assert_eq!(integral.lower_limit(|x| x, 100.0, 0.0, 1.0).unwrap(), Some(100.0));
    }

    #[test]
    fn test_lower_limit_power_law() {
        let integral = Integral::default();
        // ∫_x^E e^2 de = (E^3 - x^3) / 3
        let upper = 10.0;
        let target = 200.0;
        let limit = integral
            .lower_limit(|x| x * x, upper, target, 0.5)
            .unwrap()
            .unwrap();
        let expected = (upper.powi(3) - 3.0 * target).cbrt();
        assert!((limit - expected).abs() < 1e-8 * expected);
    }
}
