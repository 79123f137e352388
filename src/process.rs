// Capability interface for energy-loss processes
//
// Processes are shared read-only between propagation calls, so the trait
// requires `Send + Sync`. Two processes are considered the same when their
// descriptors are equal; the descriptor is also what goes into the table
// fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::cuts::EnergyCutSettings;
use crate::error::PropagationError;

/// Physical kind of an energy-loss process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessKind {
    Bremsstrahlung,
    Ionization,
    EPairProduction,
    MuPairProduction,
    Photonuclear,
    WeakInteraction,
    Compton,
    Annihilation,
    /// Analytic continuous loss `a + b E`
    LinearLoss,
    /// Analytic energy independent event rate
    ConstantRate,
}

impl ProcessKind {
    const TAGS: &'static [(&'static str, ProcessKind)] = &[
        ("brems", ProcessKind::Bremsstrahlung),
        ("ioniz", ProcessKind::Ionization),
        ("epair", ProcessKind::EPairProduction),
        ("mupair", ProcessKind::MuPairProduction),
        ("photo", ProcessKind::Photonuclear),
        ("weak", ProcessKind::WeakInteraction),
        ("compton", ProcessKind::Compton),
        ("annihilation", ProcessKind::Annihilation),
        ("linear_loss", ProcessKind::LinearLoss),
        ("constant_rate", ProcessKind::ConstantRate),
    ];

    /// Parse a process tag such as `"brems"`.
    pub fn from_tag(tag: &str) -> Result<Self, PropagationError> {
        Self::TAGS
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| PropagationError::UnknownProcessType(tag.to_string()))
    }

    pub fn tag(&self) -> &'static str {
        Self::TAGS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(t, _)| *t)
            .unwrap_or("unknown")
    }
}

/// Identity of a process: everything that changes its cross sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDescriptor {
    pub kind: ProcessKind,
    /// Name of the parametrization in use
    pub parametrization: String,
    /// Numerical parameters of the parametrization
    pub parameters: Vec<f64>,
    pub multiplier: f64,
    pub cuts: EnergyCutSettings,
    pub lpm: bool,
}

impl ProcessDescriptor {
    pub fn new(
        tag: &str,
        parametrization: &str,
        cuts: EnergyCutSettings,
    ) -> Result<Self, PropagationError> {
        Ok(ProcessDescriptor {
            kind: ProcessKind::from_tag(tag)?,
            parametrization: parametrization.to_string(),
            parameters: Vec::new(),
            multiplier: 1.0,
            cuts,
            lpm: false,
        })
    }

    pub fn with_parameters(mut self, parameters: &[f64]) -> Self {
        self.parameters = parameters.to_vec();
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_lpm(mut self, lpm: bool) -> Self {
        self.lpm = lpm;
        self
    }
}

/// A cross section as seen by the propagation engine.
///
/// All quantities refer to the reference density of the medium.
/// `dedx` and `de2dx` return magnitudes (MeV/cm and MeV^2/cm), `dndx`
/// returns the rate of stochastic losses above the cut (1/cm).
pub trait CrossSectionProcess: Send + Sync + Debug {
    fn descriptor(&self) -> &ProcessDescriptor;

    /// Continuous energy loss per unit length
    fn dedx(&self, energy: f64) -> f64;

    /// Second moment of the continuous loss, used for randomization
    fn de2dx(&self, _energy: f64) -> f64 {
        0.0
    }

    /// Stochastic rate. `rnd` is the component draw of the sampler; table
    /// builds pass `None` and expect the total.
    fn dndx(&self, energy: f64, rnd: Option<f64>) -> f64;

    /// Size of a stochastic loss at `energy`, never larger than `energy`
    fn sample_loss(&self, energy: f64, rnd_a: f64, rnd_b: f64) -> f64;

    fn kind(&self) -> ProcessKind {
        self.descriptor().kind
    }

    fn same_as(&self, other: &dyn CrossSectionProcess) -> bool {
        self.descriptor() == other.descriptor()
    }
}

/// Ordered comparison of two process lists via their descriptors.
pub fn same_processes(
    a: &[Arc<dyn CrossSectionProcess>],
    b: &[Arc<dyn CrossSectionProcess>],
) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_as(y.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for (tag, kind) in ProcessKind::TAGS {
            assert_eq!(ProcessKind::from_tag(tag).unwrap(), *kind);
            assert_eq!(kind.tag(), *tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let err = ProcessDescriptor::new("hadronic", "none", EnergyCutSettings::default())
            .unwrap_err();
        assert!(matches!(err, PropagationError::UnknownProcessType(t) if t == "hadronic"));
    }

    #[test]
    fn test_descriptor_equality_tracks_parameters() {
        let cuts = EnergyCutSettings::default();
        let a = ProcessDescriptor::new("brems", "KelnerKokoulinPetrukhin", cuts).unwrap();
        let b = a.clone().with_multiplier(1.5);
        let c = a.clone().with_lpm(true);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, a.clone());
    }
}
