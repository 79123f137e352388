// Decay collaborator: rate per unit path and product emission

use rand::RngCore;
use std::fmt::Debug;

use crate::error::PropagationError;
use crate::particle::{ParticleDef, SPEED_OF_LIGHT};

/// A decay product handed back to the propagation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayProduct {
    pub name: String,
    pub energy: f64,
}

pub trait DecayProvider: Send + Sync + Debug {
    /// Decay probability per cm of path at total energy `energy`.
    fn rate(&self, particle: &ParticleDef, energy: f64) -> f64;

    /// Products of a decay in flight at total energy `energy`.
    fn decay(
        &self,
        particle: &ParticleDef,
        energy: f64,
        rng: &mut dyn RngCore,
    ) -> Vec<DecayProduct>;

    /// Stable text identifying the rate model, hashed into table fingerprints.
    fn signature(&self) -> String;
}

/// Decay driven by the particle lifetime with fixed energy sharing.
///
/// The rate is `m / (p c tau)`, i.e. one over the dilated decay length.
/// Products take fixed fractions of the energy at the decay point; channel
/// selection physics is left to real providers.
#[derive(Debug, Clone)]
pub struct LifetimeDecay {
    products: Vec<(String, f64)>,
}

impl LifetimeDecay {
    pub fn new(products: Vec<(String, f64)>) -> Result<Self, PropagationError> {
        let total: f64 = products.iter().map(|(_, f)| *f).sum();
        if products.iter().any(|(_, f)| *f < 0.0) || total > 1.0 + 1e-12 {
            return Err(PropagationError::InvalidConfiguration(format!(
                "decay energy fractions must be non-negative and sum to at most 1, got {}",
                total
            )));
        }
        Ok(LifetimeDecay { products })
    }

    /// Three-body muon decay with mean energy sharing
    pub fn muon() -> Self {
        LifetimeDecay {
            products: vec![
                ("EMinus".to_string(), 0.35),
                ("NuMuNu".to_string(), 0.35),
                ("NuEBar".to_string(), 0.30),
            ],
        }
    }
}

impl DecayProvider for LifetimeDecay {
    fn rate(&self, particle: &ParticleDef, energy: f64) -> f64 {
        let lifetime = match particle.lifetime {
            Some(t) => t,
            None => return 0.0,
        };
        let p = particle.momentum(energy);
        if p <= 0.0 {
            return f64::INFINITY;
        }
        particle.mass / (p * SPEED_OF_LIGHT * lifetime)
    }

    fn decay(
        &self,
        _particle: &ParticleDef,
        energy: f64,
        _rng: &mut dyn RngCore,
    ) -> Vec<DecayProduct> {
        self.products
            .iter()
            .map(|(name, fraction)| DecayProduct {
                name: name.clone(),
                energy: fraction * energy,
            })
            .collect()
    }

    fn signature(&self) -> String {
        "lifetime".to_string()
    }
}
