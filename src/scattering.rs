// Spatial advancement of the particle along a leg

use nalgebra::Vector3;
use rand::RngCore;
use std::fmt::Debug;

use crate::particle::ParticleState;

/// Position and direction after a leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deflection {
    pub position: Vector3<f64>,
    pub direction: Vector3<f64>,
}

pub trait Scattering: Send + Sync + Debug {
    /// Move `state` by `displacement` (cm) while its energy drops from
    /// `e_initial` to `e_final`.
    fn scatter(
        &self,
        state: &ParticleState,
        displacement: f64,
        e_initial: f64,
        e_final: f64,
        rng: &mut dyn RngCore,
    ) -> Deflection;
}

/// No deflection: the particle keeps its direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLine;

impl Scattering for StraightLine {
    fn scatter(
        &self,
        state: &ParticleState,
        displacement: f64,
        _e_initial: f64,
        _e_final: f64,
        _rng: &mut dyn RngCore,
    ) -> Deflection {
        Deflection {
            position: state.position + state.direction * displacement,
            direction: state.direction,
        }
    }
}
