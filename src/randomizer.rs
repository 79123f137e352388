// Continuous randomization: fluctuations of the sub-cut energy losses

use rand::RngCore;
use rand_distr::{Distribution, Normal};
use std::fmt::Debug;

use crate::error::PropagationError;
use crate::integral::Integral;
use crate::tracking::ProcessSet;

const MAX_RESAMPLES: usize = 100;

pub trait ContinuousRandomizer: Send + Sync + Debug {
    /// Variance of the energy reached by a continuous step from
    /// `e_initial` to `e_final`.
    fn variance(
        &self,
        set: &ProcessSet,
        e_initial: f64,
        e_final: f64,
    ) -> Result<f64, PropagationError>;

    /// Randomized final energy, within `[Low, e_initial]`.
    fn smear(
        &self,
        set: &ProcessSet,
        e_initial: f64,
        e_final: f64,
        rng: &mut dyn RngCore,
    ) -> f64;
}

/// Gaussian smearing with width `dE/dx(E_f) * sqrt(∫ dE2/dx / (dE/dx)^3 dE)`.
///
/// Draws outside `[Low, e_initial]` are redrawn a bounded number of times and
/// then clamped.
#[derive(Debug, Clone, Default)]
pub struct GaussianRandomizer {
    integral: Integral,
}

impl GaussianRandomizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContinuousRandomizer for GaussianRandomizer {
    fn variance(
        &self,
        set: &ProcessSet,
        e_initial: f64,
        e_final: f64,
    ) -> Result<f64, PropagationError> {
        if e_final >= e_initial {
            return Ok(0.0);
        }
        let moment = self.integral.integrate_log(
            |e| {
                let dedx = set.dedx(e);
                if dedx > 0.0 {
                    set.de2dx(e) / (dedx * dedx * dedx)
                } else {
                    f64::NAN
                }
            },
            e_final,
            e_initial,
        )?;
        let dedx_final = set.dedx(e_final);
        Ok((dedx_final * dedx_final * moment).max(0.0))
    }

    fn smear(
        &self,
        set: &ProcessSet,
        e_initial: f64,
        e_final: f64,
        rng: &mut dyn RngCore,
    ) -> f64 {
        let low = set.low();
        let variance = match self.variance(set, e_initial, e_final) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("continuous randomization skipped: {}", e);
                return e_final;
            }
        };
        if !(variance > 0.0) {
            return e_final;
        }
        let normal = match Normal::new(e_final, variance.sqrt()) {
            Ok(normal) => normal,
            Err(_) => return e_final,
        };
        for _ in 0..MAX_RESAMPLES {
            let sample = normal.sample(rng);
            if (low..=e_initial).contains(&sample) {
                return sample;
            }
        }
        normal.sample(rng).clamp(low, e_initial)
    }
}
