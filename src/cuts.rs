// Energy cut settings separating continuous from stochastic losses

use serde::{Deserialize, Serialize};

use crate::error::PropagationError;

/// Absolute (`ecut`, MeV) and relative (`vcut`) loss cut.
///
/// Losses below `min(ecut, vcut * E)` are treated as continuous.
/// `ecut = inf` together with `vcut = 1` disables the cut.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyCutSettings {
    pub ecut: f64,
    pub vcut: f64,
}

impl Default for EnergyCutSettings {
    fn default() -> Self {
        EnergyCutSettings {
            ecut: 500.0,
            vcut: 0.05,
        }
    }
}

impl EnergyCutSettings {
    pub fn new(ecut: f64, vcut: f64) -> Result<Self, PropagationError> {
        if !(ecut > 0.0) {
            return Err(PropagationError::InvalidConfiguration(format!(
                "ecut must be positive, got {}",
                ecut
            )));
        }
        if !(vcut > 0.0 && vcut <= 1.0) {
            return Err(PropagationError::InvalidConfiguration(format!(
                "vcut must lie in (0, 1], got {}",
                vcut
            )));
        }
        Ok(EnergyCutSettings { ecut, vcut })
    }

    /// Every loss is sampled stochastically
    pub fn no_cut() -> Self {
        EnergyCutSettings {
            ecut: f64::INFINITY,
            vcut: 1.0,
        }
    }

    /// Relative cut at `energy`
    #[inline]
    pub fn cut(&self, energy: f64) -> f64 {
        (self.ecut.min(self.vcut * energy) / energy).min(1.0)
    }
}
