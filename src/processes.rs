// Analytic processes with closed-form integrals.
//
// These stand in for real cross sections: `LinearLoss` gives a continuous loss
// `dE/dx = a + b E` and `ConstantRate` an energy independent event rate with
// log-uniform relative losses. Both make the tracking integrals solvable by
// hand, which is what the tests lean on.

use crate::cuts::EnergyCutSettings;
use crate::error::PropagationError;
use crate::process::{CrossSectionProcess, ProcessDescriptor};

/// Continuous loss `a + b E` with optional straggling `de2dx = s E^2`.
#[derive(Debug, Clone)]
pub struct LinearLoss {
    pub a: f64,
    pub b: f64,
    pub straggling: f64,
    descriptor: ProcessDescriptor,
}

impl LinearLoss {
    pub fn new(a: f64, b: f64, cuts: EnergyCutSettings) -> Result<Self, PropagationError> {
        Self::with_straggling(a, b, 0.0, cuts)
    }

    pub fn with_straggling(
        a: f64,
        b: f64,
        straggling: f64,
        cuts: EnergyCutSettings,
    ) -> Result<Self, PropagationError> {
        if a < 0.0 || b < 0.0 || straggling < 0.0 {
            return Err(PropagationError::InvalidConfiguration(format!(
                "linear loss coefficients must be non-negative (a={}, b={}, s={})",
                a, b, straggling
            )));
        }
        let descriptor = ProcessDescriptor::new("linear_loss", "analytic", cuts)?
            .with_parameters(&[a, b, straggling]);
        Ok(LinearLoss {
            a,
            b,
            straggling,
            descriptor,
        })
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.descriptor = self.descriptor.with_multiplier(multiplier);
        self
    }
}

impl CrossSectionProcess for LinearLoss {
    fn descriptor(&self) -> &ProcessDescriptor {
        &self.descriptor
    }

    fn dedx(&self, energy: f64) -> f64 {
        self.descriptor.multiplier * (self.a + self.b * energy)
    }

    fn de2dx(&self, energy: f64) -> f64 {
        self.descriptor.multiplier * self.straggling * energy * energy
    }

    fn dndx(&self, _energy: f64, _rnd: Option<f64>) -> f64 {
        0.0
    }

    fn sample_loss(&self, _energy: f64, _rnd_a: f64, _rnd_b: f64) -> f64 {
        0.0
    }
}

/// Constant event rate with relative losses log-uniform in `[v_min, v_max]`.
///
/// `v_min = v_max = 1` makes every event absorb the full energy.
#[derive(Debug, Clone)]
pub struct ConstantRate {
    pub rate: f64,
    pub v_min: f64,
    pub v_max: f64,
    descriptor: ProcessDescriptor,
}

impl ConstantRate {
    pub fn new(
        rate: f64,
        v_min: f64,
        v_max: f64,
        cuts: EnergyCutSettings,
    ) -> Result<Self, PropagationError> {
        if rate < 0.0 || !(v_min > 0.0 && v_min <= v_max && v_max <= 1.0) {
            return Err(PropagationError::InvalidConfiguration(format!(
                "constant rate needs rate >= 0 and 0 < v_min <= v_max <= 1 (rate={}, v=[{}, {}])",
                rate, v_min, v_max
            )));
        }
        let descriptor = ProcessDescriptor::new("constant_rate", "analytic", cuts)?
            .with_parameters(&[rate, v_min, v_max]);
        Ok(ConstantRate {
            rate,
            v_min,
            v_max,
            descriptor,
        })
    }

    /// Every event takes the whole energy
    pub fn absorbing(rate: f64) -> Result<Self, PropagationError> {
        Self::new(rate, 1.0, 1.0, EnergyCutSettings::no_cut())
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.descriptor = self.descriptor.with_multiplier(multiplier);
        self
    }
}

impl CrossSectionProcess for ConstantRate {
    fn descriptor(&self) -> &ProcessDescriptor {
        &self.descriptor
    }

    fn dedx(&self, _energy: f64) -> f64 {
        0.0
    }

    fn dndx(&self, _energy: f64, _rnd: Option<f64>) -> f64 {
        self.descriptor.multiplier * self.rate
    }

    fn sample_loss(&self, energy: f64, _rnd_a: f64, rnd_b: f64) -> f64 {
        let v = self.v_min * (self.v_max / self.v_min).powf(rnd_b);
        (v * energy).min(energy)
    }
}
