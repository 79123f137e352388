// Medium record consumed by the propagation context

use crate::error::PropagationError;

/// A homogeneous medium.
///
/// Process rates are quoted for the reference density; `density_correction`
/// scales the actual density relative to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Medium {
    pub name: String,
    /// Mass density (g/cm^3)
    pub mass_density: f64,
    pub density_correction: f64,
}

impl Medium {
    pub fn new(name: &str, mass_density: f64) -> Result<Self, PropagationError> {
        Self::with_density_correction(name, mass_density, 1.0)
    }

    pub fn with_density_correction(
        name: &str,
        mass_density: f64,
        density_correction: f64,
    ) -> Result<Self, PropagationError> {
        if !(mass_density > 0.0) {
            return Err(PropagationError::InvalidConfiguration(format!(
                "medium {}: mass density must be positive, got {}",
                name, mass_density
            )));
        }
        if !(density_correction > 0.0) || !density_correction.is_finite() {
            return Err(PropagationError::InvalidConfiguration(format!(
                "medium {}: density correction must be positive, got {}",
                name, density_correction
            )));
        }
        Ok(Medium {
            name: name.to_string(),
            mass_density,
            density_correction,
        })
    }

    pub fn water() -> Self {
        Medium {
            name: "Water".to_string(),
            mass_density: 1.0,
            density_correction: 1.0,
        }
    }

    pub fn standard_rock() -> Self {
        Medium {
            name: "StandardRock".to_string(),
            mass_density: 2.65,
            density_correction: 1.0,
        }
    }
}
