// Selection of the stochastic process that fires and the size of its loss

use std::sync::Arc;

use crate::process::{CrossSectionProcess, ProcessKind};

/// A realized stochastic loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticLoss {
    pub energy_loss: f64,
    pub kind: ProcessKind,
    /// Position of the process in the registration order
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StochasticEvent {
    Loss(StochasticLoss),
    /// Rounding exhausted the cumulative scan; the caller retries the leg
    NoEvent,
}

/// Pick a process with probability proportional to its rate at `energy`.
///
/// `rnd1` selects the process, `rnd2` is forwarded to `dndx` and to the loss
/// sampler, `rnd3` drives the loss sampler. The first process whose
/// cumulative rate strictly exceeds `total * rnd1` wins.
pub fn sample_stochastic_loss(
    energy: f64,
    processes: &[Arc<dyn CrossSectionProcess>],
    rnd1: f64,
    rnd2: f64,
    rnd3: f64,
) -> StochasticEvent {
    let rates: Vec<f64> = processes
        .iter()
        .map(|p| p.dndx(energy, Some(rnd2)).max(0.0))
        .collect();
    let total: f64 = rates.iter().sum();
    let target = total * rnd1;

    let mut accum = 0.0;
    for (index, (process, rate)) in processes.iter().zip(&rates).enumerate() {
        accum += rate;
        if accum > target {
            let energy_loss = process.sample_loss(energy, rnd2, rnd3).clamp(0.0, energy);
            log::debug!(
                "{} at {:e} MeV: loss {:e} MeV (rate {:e} of {:e})",
                process.kind().tag(),
                energy,
                energy_loss,
                rate,
                total
            );
            return StochasticEvent::Loss(StochasticLoss {
                energy_loss,
                kind: process.kind(),
                index,
            });
        }
    }
    log::debug!("no stochastic process selected at {:e} MeV (total rate {:e})", energy, total);
    StochasticEvent::NoEvent
}
