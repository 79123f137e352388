// Tracking integrals: distance, optical depth and time between two energies.
//
// Every quantity is an integral over energy of a kernel divided by the
// continuous loss. Evaluation is exact (Romberg on the providers) or goes
// through a prebuilt `TableSet`; both paths share the half-precision guards
// that replace a table difference by a midpoint estimate when the difference
// is too small to be trusted.

use std::sync::Arc;

use crate::decay::DecayProvider;
use crate::error::PropagationError;
use crate::integral::Integral;
use crate::particle::{ParticleDef, SPEED_OF_LIGHT};
use crate::process::CrossSectionProcess;
use crate::table_cache::{KernelTable, TableSet};

/// Relative change below which table differences fall back to the kernel
pub const HALF_PRECISION: f64 = 1e-5;

const MIDPOINT_ITERATIONS: usize = 3;

/// Energy step `delta` with `delta * k(energy - delta / 2) = depth`.
///
/// Starts from `depth / k(energy)`; the first update is the midpoint rule,
/// later ones make the step consistent with the midpoint integral.
fn midpoint_step<K: Fn(f64) -> f64>(kernel: K, energy: f64, depth: f64) -> Option<f64> {
    let k_initial = kernel(energy);
    if !(k_initial > 0.0 && k_initial.is_finite()) {
        return None;
    }
    let mut delta = depth / k_initial;
    for _ in 0..MIDPOINT_ITERATIONS {
        let k_mid = kernel(energy - 0.5 * delta);
        if !(k_mid > 0.0 && k_mid.is_finite()) {
            return None;
        }
        delta = depth / k_mid;
    }
    Some(delta)
}

/// Integrand selector. Each kernel is divided by the continuous loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// `1 / dE/dx`, integrates to distance
    Displacement,
    /// `decay rate / dE/dx`, integrates to decay optical depth
    Decay,
    /// `sum dN/dx / dE/dx`, integrates to interaction optical depth
    Interaction,
    /// `E / (p c) / dE/dx`, integrates to time of flight
    Time,
}

impl Kernel {
    pub const ALL: [Kernel; 4] = [
        Kernel::Displacement,
        Kernel::Decay,
        Kernel::Interaction,
        Kernel::Time,
    ];

    pub fn index(self) -> usize {
        match self {
            Kernel::Displacement => 0,
            Kernel::Decay => 1,
            Kernel::Interaction => 2,
            Kernel::Time => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kernel::Displacement => "displacement",
            Kernel::Decay => "decay",
            Kernel::Interaction => "interaction",
            Kernel::Time => "time",
        }
    }
}

/// The particle together with everything that removes energy from it.
#[derive(Debug, Clone)]
pub struct ProcessSet {
    pub particle: ParticleDef,
    pub processes: Vec<Arc<dyn CrossSectionProcess>>,
    pub decay: Option<Arc<dyn DecayProvider>>,
}

impl ProcessSet {
    pub fn new(
        particle: ParticleDef,
        processes: Vec<Arc<dyn CrossSectionProcess>>,
        decay: Option<Arc<dyn DecayProvider>>,
    ) -> Self {
        ProcessSet {
            particle,
            processes,
            decay,
        }
    }

    pub fn low(&self) -> f64 {
        self.particle.low
    }

    pub fn dedx(&self, energy: f64) -> f64 {
        self.processes.iter().map(|p| p.dedx(energy)).sum()
    }

    pub fn de2dx(&self, energy: f64) -> f64 {
        self.processes.iter().map(|p| p.de2dx(energy)).sum()
    }

    pub fn total_dndx(&self, energy: f64) -> f64 {
        self.processes.iter().map(|p| p.dndx(energy, None)).sum()
    }

    pub fn decay_rate(&self, energy: f64) -> f64 {
        match &self.decay {
            Some(decay) => decay.rate(&self.particle, energy),
            None => 0.0,
        }
    }

    /// Whether `kernel` can be non-zero for this set.
    pub fn has_kernel(&self, kernel: Kernel) -> bool {
        match kernel {
            Kernel::Decay => self.decay.is_some() && !self.particle.is_stable(),
            Kernel::Time => self.particle.low > self.particle.mass,
            Kernel::Displacement | Kernel::Interaction => true,
        }
    }

    /// Kernel value at `energy`. NaN when the continuous loss vanishes,
    /// which the quadrature reports as an integration failure.
    pub fn kernel(&self, kernel: Kernel, energy: f64) -> f64 {
        let dedx = self.dedx(energy);
        if !(dedx > 0.0) {
            return f64::NAN;
        }
        match kernel {
            Kernel::Displacement => 1.0 / dedx,
            Kernel::Decay => self.decay_rate(energy) / dedx,
            Kernel::Interaction => self.total_dndx(energy) / dedx,
            Kernel::Time => {
                energy / (self.particle.momentum(energy) * SPEED_OF_LIGHT) / dedx
            }
        }
    }
}

/// Per-call bookkeeping of the tracking integrals.
///
/// Holds the optical depths sampled for the current leg and the partial
/// integral (table value or integral down to Low) at the leg's initial
/// energy, one slot per kernel.
#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    pub leg_energy: f64,
    pub decay_depth: f64,
    pub interaction_depth: f64,
    partial: [Option<(f64, f64)>; 4],
}

impl TrackingState {
    pub fn begin_leg(&mut self, energy: f64, decay_depth: f64, interaction_depth: f64) {
        if energy != self.leg_energy {
            self.partial = [None; 4];
        }
        self.leg_energy = energy;
        self.decay_depth = decay_depth;
        self.interaction_depth = interaction_depth;
    }

    fn cached(&self, kernel: Kernel, energy: f64) -> Option<f64> {
        match self.partial[kernel.index()] {
            Some((e, value)) if e == energy => Some(value),
            _ => None,
        }
    }

    fn store(&mut self, kernel: Kernel, energy: f64, value: f64) {
        self.partial[kernel.index()] = Some((energy, value));
    }
}

/// Evaluates the tracking integrals for one propagation call.
#[derive(Debug)]
pub struct TrackingIntegral<'a> {
    set: &'a ProcessSet,
    tables: Option<&'a TableSet>,
    integral: Integral,
    pub state: TrackingState,
}

impl<'a> TrackingIntegral<'a> {
    pub fn new(set: &'a ProcessSet, tables: Option<&'a TableSet>) -> Self {
        TrackingIntegral {
            set,
            tables,
            integral: Integral::default(),
            state: TrackingState::default(),
        }
    }

    pub fn exact(set: &'a ProcessSet) -> Self {
        Self::new(set, None)
    }

    pub fn low(&self) -> f64 {
        self.set.low()
    }

    pub fn process_set(&self) -> &'a ProcessSet {
        self.set
    }

    pub fn is_interpolated(&self) -> bool {
        self.tables.is_some()
    }

    /// Table for `kernel`, if one exists and covers `energy`.
    fn table(&self, kernel: Kernel, energy: f64) -> Option<&'a KernelTable> {
        self.tables
            .filter(|t| energy <= t.upper_energy())
            .and_then(|t| t.get(kernel))
    }

    fn checked_kernel(&self, kernel: Kernel, energy: f64) -> Result<f64, PropagationError> {
        let value = self.set.kernel(kernel, energy);
        if value.is_finite() && value >= 0.0 {
            Ok(value)
        } else {
            Err(PropagationError::integration(
                energy,
                energy,
                format!("degenerate {} kernel ({})", kernel.name(), value),
            ))
        }
    }

    /// Kernel value from the table when available, else from the providers.
    pub fn kernel_value(&self, kernel: Kernel, energy: f64) -> Result<f64, PropagationError> {
        match self.table(kernel, energy) {
            Some(table) => Ok(table.kernel(energy)),
            None => self.checked_kernel(kernel, energy),
        }
    }

    fn table_value(&mut self, kernel: Kernel, table: &KernelTable, energy: f64) -> f64 {
        if let Some(value) = self.state.cached(kernel, energy) {
            return value;
        }
        let value = table.value(energy);
        self.state.store(kernel, energy, value);
        value
    }

    /// `∫_{e_final}^{e_initial} kernel dE` for `e_final <= e_initial`.
    pub fn integrate(
        &mut self,
        kernel: Kernel,
        e_initial: f64,
        e_final: f64,
    ) -> Result<f64, PropagationError> {
        let delta = e_initial - e_final;
        if delta <= 0.0 {
            return Ok(0.0);
        }
        let midpoint = 0.5 * (e_initial + e_final);

        if let Some(table) = self.table(kernel, e_initial) {
            if delta > e_initial * HALF_PRECISION {
                let t_initial = self.table_value(kernel, table, e_initial);
                let aux = table.sign() * (t_initial - table.value(e_final));
                if aux.abs() > t_initial.abs() * HALF_PRECISION {
                    return Ok(aux.max(0.0));
                }
            }
            return Ok(delta * table.kernel(midpoint));
        }

        if delta <= e_initial * HALF_PRECISION {
            return Ok(delta * self.checked_kernel(kernel, midpoint)?);
        }
        let set = self.set;
        self.integral
            .integrate_log(|e| set.kernel(kernel, e), e_final, e_initial)
    }

    /// Integral from `energy` all the way down to Low.
    pub fn depth_to_low(&mut self, kernel: Kernel, energy: f64) -> Result<f64, PropagationError> {
        let low = self.low();
        if energy <= low || !self.set.has_kernel(kernel) {
            return Ok(0.0);
        }
        if let Some(table) = self.table(kernel, energy) {
            let t_initial = self.table_value(kernel, table, energy);
            return Ok((table.sign() * (t_initial - table.at_low())).max(0.0));
        }
        if let Some(value) = self.state.cached(kernel, energy) {
            return Ok(value);
        }
        let set = self.set;
        let value = self
            .integral
            .integrate_log(|e| set.kernel(kernel, e), low, energy)?;
        self.state.store(kernel, energy, value);
        Ok(value)
    }

    /// Energy at which the integral from `energy` downward reaches `depth`.
    ///
    /// Returns Low when the whole range down to Low holds less than `depth`.
    pub fn energy_after(
        &mut self,
        kernel: Kernel,
        energy: f64,
        depth: f64,
    ) -> Result<f64, PropagationError> {
        let low = self.low();
        if depth <= 0.0 {
            return Ok(energy);
        }
        if energy <= low || !self.set.has_kernel(kernel) {
            return Ok(low);
        }
        let total = self.depth_to_low(kernel, energy)?;
        if !(total > depth) {
            return Ok(low);
        }

        if let Some(table) = self.table(kernel, energy) {
            let t_initial = self.table_value(kernel, table, energy);
            let flat = depth < t_initial.abs() * HALF_PRECISION;
            if flat || depth <= energy * HALF_PRECISION * table.kernel(energy) {
                if let Some(delta) = midpoint_step(|e| table.kernel(e), energy, depth) {
                    if flat || delta <= energy * HALF_PRECISION {
                        return Ok((energy - delta).clamp(low, energy));
                    }
                }
            }
            let target = t_initial - table.sign() * depth;
            return Ok(table.energy_at(target).clamp(low, energy));
        }

        let set = self.set;
        // steps below the half precision go through the midpoint rule,
        // matching `integrate` on the way back
        if depth <= energy * HALF_PRECISION * set.kernel(kernel, energy) {
            if let Some(delta) = midpoint_step(|e| set.kernel(kernel, e), energy, depth) {
                if delta <= energy * HALF_PRECISION {
                    return Ok((energy - delta).clamp(low, energy));
                }
            }
        }
        let limit = self.integral.lower_limit_within(
            |e| set.kernel(kernel, e),
            energy,
            depth,
            low,
            total,
        )?;
        Ok(limit.unwrap_or(low).clamp(low, energy))
    }
}
