// Distance between energies and energy after a distance

use crate::error::PropagationError;
use crate::tracking::{Kernel, TrackingIntegral};

/// Conversion between energy intervals and path length.
///
/// Distances are in units of the reference density of the medium; callers
/// divide by the density correction. The two directions are mutually
/// consistent: `distance_between(e, energy_after_distance(e, d)) == d` up to
/// the half-precision tolerance, as long as the energy stays above Low.
pub trait DisplacementSolver {
    /// Path length needed to slow down from `e_initial` to `e_final`.
    fn distance_between(&mut self, e_initial: f64, e_final: f64) -> Result<f64, PropagationError>;

    /// Energy after travelling `distance` from `e_initial`, clamped to
    /// `[Low, e_initial]`.
    fn energy_after_distance(
        &mut self,
        e_initial: f64,
        distance: f64,
    ) -> Result<f64, PropagationError>;
}

impl DisplacementSolver for TrackingIntegral<'_> {
    fn distance_between(&mut self, e_initial: f64, e_final: f64) -> Result<f64, PropagationError> {
        self.integrate(Kernel::Displacement, e_initial, e_final)
    }

    fn energy_after_distance(
        &mut self,
        e_initial: f64,
        distance: f64,
    ) -> Result<f64, PropagationError> {
        self.energy_after(Kernel::Displacement, e_initial, distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuts::EnergyCutSettings;
    use crate::particle::ParticleDef;
    use crate::processes::LinearLoss;
    use crate::tracking::ProcessSet;
    use std::sync::Arc;

    fn proportional_loss(k: f64) -> ProcessSet {
        ProcessSet::new(
            ParticleDef::new("test", 0.0, 0.0, None, 1e-3).unwrap(),
            vec![Arc::new(
                LinearLoss::new(0.0, k, EnergyCutSettings::no_cut()).unwrap(),
            )],
            None,
        )
    }

    #[test]
    fn test_exponential_slowing_down() {
        let set = proportional_loss(0.01);
        let mut solver = TrackingIntegral::exact(&set);
        for d in [0.5, 10.0, 150.0] {
            let e = solver.energy_after_distance(100.0, d).unwrap();
            let expected = 100.0 * (-0.01 * d).exp();
            assert!(((e - expected) / expected).abs() < 1e-8);
        }
    }

    #[test]
    fn test_round_trip_and_range_exhaustion() {
        let set = proportional_loss(0.01);
        let mut solver = TrackingIntegral::exact(&set);
        let e = solver.energy_after_distance(100.0, 42.0).unwrap();
        let d = solver.distance_between(100.0, e).unwrap();
        assert!((d - 42.0).abs() < 1e-5 * 42.0);
        // ln(1e5) / 0.01 ≈ 1151 is the full range down to Low
        assert_eq!(solver.energy_after_distance(100.0, 5000.0).unwrap(), 1e-3);
        assert_eq!(solver.distance_between(100.0, 100.0).unwrap(), 0.0);
    }
}
