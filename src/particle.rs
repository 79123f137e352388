// Particle definition and the mutable state owned by a propagation call

use nalgebra::Vector3;

use crate::error::PropagationError;

/// Speed of light in cm/s
pub const SPEED_OF_LIGHT: f64 = 2.99792458e10;

/// Static description of a particle species.
///
/// Energies and masses are in MeV, the lifetime in seconds (rest frame).
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleDef {
    pub name: String,
    pub mass: f64,
    pub charge: f64,
    /// `None` for a stable particle
    pub lifetime: Option<f64>,
    /// Lowest energy the particle is tracked to
    pub low: f64,
}

impl ParticleDef {
    pub fn new(
        name: &str,
        mass: f64,
        charge: f64,
        lifetime: Option<f64>,
        low: f64,
    ) -> Result<Self, PropagationError> {
        let def = ParticleDef {
            name: name.to_string(),
            mass,
            charge,
            lifetime,
            low,
        };
        def.validate(false)?;
        Ok(def)
    }

    /// Muon with the tracking floor at its rest mass plus 1 MeV.
    pub fn muon() -> Self {
        ParticleDef {
            name: "MuMinus".to_string(),
            mass: 105.6583745,
            charge: -1.0,
            lifetime: Some(2.1969811e-6),
            low: 106.6583745,
        }
    }

    /// Stable electron tracked down to 1 MeV.
    pub fn electron() -> Self {
        ParticleDef {
            name: "EMinus".to_string(),
            mass: 0.5109989461,
            charge: -1.0,
            lifetime: None,
            low: 1.0,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.lifetime.is_none()
    }

    /// Check the energy floor against the mass.
    ///
    /// `needs_momentum` is set when a kernel divides by the momentum
    /// (decay rate, exact time); then `low` must lie strictly above the mass.
    pub fn validate(&self, needs_momentum: bool) -> Result<(), PropagationError> {
        if !(self.low > 0.0) || !self.low.is_finite() {
            return Err(PropagationError::InvalidConfiguration(format!(
                "particle {}: low energy must be positive, got {}",
                self.name, self.low
            )));
        }
        if !(self.mass >= 0.0) {
            return Err(PropagationError::InvalidConfiguration(format!(
                "particle {}: mass must be non-negative, got {}",
                self.name, self.mass
            )));
        }
        if self.low < self.mass || (needs_momentum && self.low <= self.mass) {
            return Err(PropagationError::InvalidConfiguration(format!(
                "particle {}: low energy {} does not exceed the mass {}",
                self.name, self.low, self.mass
            )));
        }
        if let Some(lifetime) = self.lifetime {
            if !(lifetime > 0.0) {
                return Err(PropagationError::InvalidConfiguration(format!(
                    "particle {}: lifetime must be positive, got {}",
                    self.name, lifetime
                )));
            }
        }
        Ok(())
    }

    /// Momentum at total energy `energy`, zero below the mass.
    #[inline]
    pub fn momentum(&self, energy: f64) -> f64 {
        ((energy - self.mass) * (energy + self.mass)).max(0.0).sqrt()
    }
}

/// Kinematic state of the propagated particle.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    pub energy: f64,
    /// Distance covered so far (cm)
    pub propagated_distance: f64,
    /// Elapsed time (s)
    pub time: f64,
    pub position: Vector3<f64>,
    pub direction: Vector3<f64>,
    pub low: f64,
    pub decayed: bool,
}

impl ParticleState {
    pub fn new(
        def: &ParticleDef,
        energy: f64,
        position: Vector3<f64>,
        direction: Vector3<f64>,
    ) -> Self {
        Self {
            energy,
            propagated_distance: 0.0,
            time: 0.0,
            position,
            direction,
            low: def.low,
            decayed: false,
        }
    }

    /// Particle at the origin heading along +z.
    pub fn at_origin(def: &ParticleDef, energy: f64) -> Self {
        Self::new(def, energy, Vector3::zeros(), Vector3::z())
    }

    pub fn is_alive(&self) -> bool {
        !self.decayed && self.energy > self.low
    }
}
