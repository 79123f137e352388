// Propagation context and the leg-by-leg transport loop
//
// A leg starts at the current energy, samples the energy at which the next
// decay and the next stochastic interaction would happen, moves the particle
// to the higher of the two (or to the target distance, whichever comes
// first) and realizes at most one event. Distances handed out by the
// tracking integrals are in units of the reference density and are divided
// by the medium's density correction here.

use rand::{Rng, RngCore};
use std::path::Path;
use std::sync::Arc;

use crate::bank::{Secondary, SecondaryKind, SecondarySink};
use crate::cuts::EnergyCutSettings;
use crate::decay::DecayProvider;
use crate::displacement::DisplacementSolver;
use crate::error::PropagationError;
use crate::fingerprint::TableKey;
use crate::medium::Medium;
use crate::particle::{ParticleDef, ParticleState, SPEED_OF_LIGHT};
use crate::process::{same_processes, CrossSectionProcess};
use crate::randomizer::{ContinuousRandomizer, GaussianRandomizer};
use crate::sampler::{sample_stochastic_loss, StochasticEvent};
use crate::scattering::{Scattering, StraightLine};
use crate::settings::PropagationSettings;
use crate::table_cache::{obtain_tables, TableSet};
use crate::tracking::{Kernel, ProcessSet, TrackingIntegral};

/// Relative tolerance for snapping the propagated distance onto the target.
pub const COMPUTER_PRECISION: f64 = 1e-10;

/// How a propagation call ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropagationOutcome {
    /// The target distance was covered; the particle is still alive.
    Reached { energy: f64 },
    /// The particle decayed or dropped to Low after `distance` cm.
    StoppedEarly { distance: f64 },
}

/// Counters of one propagation call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegStats {
    pub legs: usize,
    pub interactions: usize,
    pub decays: usize,
    pub no_events: usize,
    /// Legs handled at constant energy because the tracking integral failed
    pub frozen_legs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegEvent {
    Interaction,
    Decay,
}

#[derive(Debug, Clone, Copy)]
struct Leg {
    final_energy: f64,
    displacement: f64,
    event: LegEvent,
    frozen: bool,
}

/// Everything needed to move one particle species through one medium.
#[derive(Debug, Clone)]
pub struct Propagator {
    set: ProcessSet,
    medium: Medium,
    cuts: EnergyCutSettings,
    randomizer: Option<Arc<dyn ContinuousRandomizer>>,
    scattering: Arc<dyn Scattering>,
    settings: PropagationSettings,
    tables: Option<Arc<TableSet>>,
}

/// Builder for [`Propagator`].
#[derive(Debug)]
pub struct PropagatorBuilder {
    particle: ParticleDef,
    medium: Medium,
    cuts: EnergyCutSettings,
    processes: Vec<Arc<dyn CrossSectionProcess>>,
    decay: Option<Arc<dyn DecayProvider>>,
    randomizer: Option<Arc<dyn ContinuousRandomizer>>,
    scattering: Option<Arc<dyn Scattering>>,
    settings: Option<PropagationSettings>,
}

impl PropagatorBuilder {
    /// Append a process. Registration order is the sampling order.
    pub fn process(mut self, process: Arc<dyn CrossSectionProcess>) -> Self {
        self.processes.push(process);
        self
    }

    pub fn processes<I>(mut self, processes: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn CrossSectionProcess>>,
    {
        self.processes.extend(processes);
        self
    }

    pub fn decay(mut self, decay: Arc<dyn DecayProvider>) -> Self {
        self.decay = Some(decay);
        self
    }

    pub fn randomizer(mut self, randomizer: Arc<dyn ContinuousRandomizer>) -> Self {
        self.randomizer = Some(randomizer);
        self
    }

    pub fn scattering(mut self, scattering: Arc<dyn Scattering>) -> Self {
        self.scattering = Some(scattering);
        self
    }

    pub fn settings(mut self, settings: PropagationSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Validate and assemble the propagator.
    ///
    /// With `settings.interpolate` set, the interpolation tables are obtained
    /// right away and any failure to build them is returned.
    pub fn build(self) -> Result<Propagator, PropagationError> {
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let decays = self.decay.is_some() && !self.particle.is_stable();
        self.particle.validate(decays || settings.exact_time)?;

        let randomizer = match self.randomizer {
            Some(r) => Some(r),
            None if settings.continuous_randomization => {
                Some(Arc::new(GaussianRandomizer::new()) as Arc<dyn ContinuousRandomizer>)
            }
            None => None,
        };

        let mut propagator = Propagator {
            set: ProcessSet::new(self.particle, self.processes, self.decay),
            medium: self.medium,
            cuts: self.cuts,
            randomizer,
            scattering: self.scattering.unwrap_or_else(|| Arc::new(StraightLine)),
            settings,
            tables: None,
        };
        if propagator.settings.interpolate {
            propagator.enable_interpolation()?;
        }
        Ok(propagator)
    }
}

impl Propagator {
    pub fn builder(
        particle: ParticleDef,
        medium: Medium,
        cuts: EnergyCutSettings,
    ) -> PropagatorBuilder {
        PropagatorBuilder {
            particle,
            medium,
            cuts,
            processes: Vec::new(),
            decay: None,
            randomizer: None,
            scattering: None,
            settings: None,
        }
    }

    pub fn particle(&self) -> &ParticleDef {
        &self.set.particle
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn cuts(&self) -> &EnergyCutSettings {
        &self.cuts
    }

    pub fn processes(&self) -> &[Arc<dyn CrossSectionProcess>] {
        &self.set.processes
    }

    /// Particle, processes and decay as one set, for direct tracking queries
    pub fn process_set(&self) -> &ProcessSet {
        &self.set
    }

    pub fn settings(&self) -> &PropagationSettings {
        &self.settings
    }

    pub fn tables(&self) -> Option<&Arc<TableSet>> {
        self.tables.as_ref()
    }

    pub fn is_interpolated(&self) -> bool {
        self.tables.is_some()
    }

    /// Key identifying the tables of this propagator.
    pub fn table_key(&self) -> TableKey<'_> {
        TableKey {
            particle: &self.set.particle,
            medium: &self.medium,
            cuts: &self.cuts,
            processes: &self.set.processes,
            decay: self.set.decay.as_deref(),
            nodes: self.settings.interpolation_nodes,
            upper_energy: self.settings.table_upper_energy,
        }
    }

    /// Switch to table lookups, loading or building the tables as needed.
    pub fn enable_interpolation(&mut self) -> Result<(), PropagationError> {
        let tables = {
            let key = self.table_key();
            obtain_tables(
                &self.set,
                &key,
                self.settings.table_directory.as_deref(),
                self.settings.table_encoding,
            )?
        };
        self.tables = Some(tables);
        self.settings.interpolate = true;
        Ok(())
    }

    /// Like [`Propagator::enable_interpolation`] with an explicit table directory.
    pub fn enable_interpolation_in<P: AsRef<Path>>(
        &mut self,
        directory: Option<P>,
    ) -> Result<(), PropagationError> {
        self.settings.table_directory = directory.map(|p| p.as_ref().to_path_buf());
        self.enable_interpolation()
    }

    /// Back to exact quadrature.
    pub fn disable_interpolation(&mut self) {
        self.tables = None;
        self.settings.interpolate = false;
    }

    /// Same ordered process list, compared through the descriptors.
    pub fn same_processes(&self, other: &Propagator) -> bool {
        same_processes(&self.set.processes, &other.set.processes)
    }

    /// Advance `state` by up to `distance` cm, pushing every stochastic loss
    /// and decay product into `sink`.
    pub fn propagate(
        &self,
        state: &mut ParticleState,
        distance: f64,
        rng: &mut dyn RngCore,
        sink: &mut dyn SecondarySink,
    ) -> PropagationOutcome {
        self.propagate_with_stats(state, distance, rng, sink).0
    }

    /// [`Propagator::propagate`] that also reports leg counters.
    pub fn propagate_with_stats(
        &self,
        state: &mut ParticleState,
        distance: f64,
        rng: &mut dyn RngCore,
        sink: &mut dyn SecondarySink,
    ) -> (PropagationOutcome, LegStats) {
        let mut stats = LegStats::default();
        let low = self.set.low();
        state.low = low;

        if state.decayed || state.energy <= low {
            state.energy = state.energy.max(low);
            return (PropagationOutcome::StoppedEarly { distance: 0.0 }, stats);
        }
        if !(distance > 0.0) {
            return (PropagationOutcome::Reached { energy: state.energy }, stats);
        }

        let start = state.propagated_distance;
        let mut tracking = TrackingIntegral::new(&self.set, self.tables.as_deref());
        let mut travelled = 0.0;
        let mut no_progress = 0usize;
        let mut continuous_only = false;

        loop {
            let e_initial = state.energy;
            let remaining = distance - travelled;
            let rnd_decay = -open_uniform(rng).ln();
            let rnd_interact = -open_uniform(rng).ln();
            stats.legs += 1;

            let leg = match self.plan_leg(
                &mut tracking,
                e_initial,
                rnd_decay,
                rnd_interact,
                remaining,
                continuous_only,
            ) {
                Ok(leg) => leg,
                Err(e) => {
                    log::debug!("frozen leg at {:e} MeV: {}", e_initial, e);
                    stats.frozen_legs += 1;
                    self.frozen_leg(e_initial, rnd_decay, rnd_interact, remaining, continuous_only)
                }
            };

            let mut e_final = leg.final_energy;
            if let Some(randomizer) = &self.randomizer {
                if self.settings.continuous_randomization && !leg.frozen && e_final != low {
                    e_final = randomizer
                        .smear(&self.set, e_initial, e_final, rng)
                        .clamp(low, e_initial);
                }
            }
            if e_final < e_initial {
                no_progress = 0;
            }

            let dt = self.elapsed_time(&mut tracking, &leg, e_initial, e_final);
            let deflection = self
                .scattering
                .scatter(state, leg.displacement, e_initial, e_final, rng);
            state.position = deflection.position;
            state.direction = deflection.direction;
            state.time += dt;
            state.energy = e_final;

            travelled += leg.displacement;
            if (distance - travelled).abs() < distance.abs() * COMPUTER_PRECISION {
                travelled = distance;
            }
            travelled = travelled.min(distance);
            state.propagated_distance = start + travelled;

            if e_final <= low {
                state.energy = low;
                break;
            }
            if travelled >= distance {
                break;
            }

            match leg.event {
                LegEvent::Interaction => {
                    let rnd1: f64 = rng.gen();
                    let rnd2: f64 = rng.gen();
                    let rnd3: f64 = rng.gen();
                    let event =
                        sample_stochastic_loss(e_final, &self.set.processes, rnd1, rnd2, rnd3);
                    match event {
                        StochasticEvent::Loss(loss) => {
                            stats.interactions += 1;
                            no_progress = 0;
                            sink.push(Secondary {
                                kind: SecondaryKind::Loss(loss.kind),
                                energy: loss.energy_loss,
                                offset: state.propagated_distance,
                                position: state.position,
                                time: state.time,
                            });
                            state.energy = e_final - loss.energy_loss;
                            if state.energy <= low {
                                state.energy = low;
                                break;
                            }
                        }
                        StochasticEvent::NoEvent => {
                            stats.no_events += 1;
                            if e_final >= e_initial {
                                no_progress += 1;
                            }
                            let limit = self.settings.max_no_event_retries;
                            if no_progress > limit && !continuous_only {
                                log::warn!(
                                    "{} retries without progress at {:e} MeV; \
                                     continuous losses only for the last {:e} cm",
                                    no_progress,
                                    e_final,
                                    distance - travelled
                                );
                                continuous_only = true;
                            }
                        }
                    }
                }
                LegEvent::Decay => {
                    stats.decays += 1;
                    if let Some(decay) = &self.set.decay {
                        for product in decay.decay(&self.set.particle, e_final, rng) {
                            sink.push(Secondary {
                                kind: SecondaryKind::DecayProduct(product.name),
                                energy: product.energy,
                                offset: state.propagated_distance,
                                position: state.position,
                                time: state.time,
                            });
                        }
                    }
                    state.decayed = true;
                    break;
                }
            }
        }

        let outcome = if travelled >= distance && !state.decayed {
            PropagationOutcome::Reached {
                energy: state.energy,
            }
        } else {
            PropagationOutcome::StoppedEarly {
                distance: travelled,
            }
        };
        (outcome, stats)
    }

    fn plan_leg(
        &self,
        tracking: &mut TrackingIntegral<'_>,
        e_initial: f64,
        rnd_decay: f64,
        rnd_interact: f64,
        remaining: f64,
        continuous_only: bool,
    ) -> Result<Leg, PropagationError> {
        let low = tracking.low();
        let density_correction = self.medium.density_correction;
        tracking
            .state
            .begin_leg(e_initial, rnd_decay * density_correction, rnd_interact);

        let (e_decay, e_interact) = if continuous_only {
            (low, low)
        } else {
            (
                tracking.energy_after(Kernel::Decay, e_initial, rnd_decay * density_correction)?,
                tracking.energy_after(Kernel::Interaction, e_initial, rnd_interact)?,
            )
        };

        let (candidate, event) = if e_interact > e_decay {
            (e_interact, LegEvent::Interaction)
        } else {
            if e_decay == e_interact && e_decay > low {
                log::debug!("decay and interaction tie at {:e} MeV; decaying", e_decay);
            }
            (e_decay, LegEvent::Decay)
        };

        let displacement = tracking.distance_between(e_initial, candidate)? / density_correction;
        if displacement > remaining {
            let e_final =
                tracking.energy_after_distance(e_initial, remaining * density_correction)?;
            return Ok(Leg {
                final_energy: e_final,
                displacement: remaining,
                event,
                frozen: false,
            });
        }
        Ok(Leg {
            final_energy: candidate,
            displacement,
            event,
            frozen: false,
        })
    }

    /// Leg at constant energy with directly sampled event distances.
    fn frozen_leg(
        &self,
        energy: f64,
        rnd_decay: f64,
        rnd_interact: f64,
        remaining: f64,
        continuous_only: bool,
    ) -> Leg {
        let interaction_rate = self.set.total_dndx(energy) * self.medium.density_correction;
        let decay_rate = self.set.decay_rate(energy);
        let sampled = |depth: f64, rate: f64| {
            if !continuous_only && rate > 0.0 && rate.is_finite() {
                depth / rate
            } else {
                f64::INFINITY
            }
        };
        let d_interact = sampled(rnd_interact, interaction_rate);
        let d_decay = sampled(rnd_decay, decay_rate);
        let (d_event, event) = if d_interact < d_decay {
            (d_interact, LegEvent::Interaction)
        } else {
            (d_decay, LegEvent::Decay)
        };
        Leg {
            final_energy: energy,
            displacement: d_event.min(remaining),
            event,
            frozen: true,
        }
    }

    fn elapsed_time(
        &self,
        tracking: &mut TrackingIntegral<'_>,
        leg: &Leg,
        e_initial: f64,
        e_final: f64,
    ) -> f64 {
        if !self.settings.exact_time {
            return leg.displacement / SPEED_OF_LIGHT;
        }
        if !leg.frozen {
            match tracking.integrate(Kernel::Time, e_initial, e_final) {
                Ok(t) => return t / self.medium.density_correction,
                Err(e) => log::debug!("time integral failed, using beta = 1: {}", e),
            }
            return leg.displacement / SPEED_OF_LIGHT;
        }
        let momentum = self.set.particle.momentum(e_initial);
        if momentum > 0.0 {
            leg.displacement * e_initial / (momentum * SPEED_OF_LIGHT)
        } else {
            leg.displacement / SPEED_OF_LIGHT
        }
    }
}

/// Uniform draw in (0, 1).
fn open_uniform(rng: &mut dyn RngCore) -> f64 {
    loop {
        let u: f64 = rng.gen();
        if u > 0.0 {
            return u;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::SecondaryBank;
    use crate::decay::LifetimeDecay;
    use crate::fast_rng::FastRng;
    use crate::processes::{ConstantRate, LinearLoss};

    fn test_particle() -> ParticleDef {
        ParticleDef::new("test", 0.0, -1.0, None, 1.0).unwrap()
    }

    fn exact() -> PropagationSettings {
        PropagationSettings {
            interpolate: false,
            table_directory: None,
            ..PropagationSettings::default()
        }
    }

    fn continuous_only(a: f64, b: f64) -> Propagator {
        Propagator::builder(test_particle(), Medium::water(), EnergyCutSettings::no_cut())
            .process(Arc::new(LinearLoss::new(a, b, EnergyCutSettings::no_cut()).unwrap()))
            .settings(exact())
            .build()
            .unwrap()
    }

    #[test]
    fn test_continuous_loss_reaches_target() {
        // constant dE/dx = 2 MeV/cm: 10 cm cost 20 MeV
        let propagator = continuous_only(2.0, 0.0);
        let mut state = ParticleState::at_origin(propagator.particle(), 100.0);
        let mut rng = FastRng::new(1);
        let mut bank = SecondaryBank::new();
        let outcome = propagator.propagate(&mut state, 10.0, &mut rng, &mut bank);
        match outcome {
            PropagationOutcome::Reached { energy } => assert!((energy - 80.0).abs() < 1e-6),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(state.propagated_distance, 10.0);
        assert!((state.position.z - 10.0).abs() < 1e-9);
        assert!((state.time - 10.0 / SPEED_OF_LIGHT).abs() < 1e-18);
        assert!(bank.is_empty());
    }

    #[test]
    fn test_continuous_loss_runs_out_of_energy() {
        let propagator = continuous_only(2.0, 0.0);
        let mut state = ParticleState::at_origin(propagator.particle(), 100.0);
        let mut rng = FastRng::new(1);
        let mut bank = SecondaryBank::new();
        match propagator.propagate(&mut state, 1000.0, &mut rng, &mut bank) {
            PropagationOutcome::StoppedEarly { distance } => {
                assert!((distance - 49.5).abs() < 1e-6)
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(state.energy, 1.0);
        assert!(!state.is_alive());
    }

    #[test]
    fn test_density_correction_shortens_range() {
        let particle = test_particle();
        let medium = Medium::with_density_correction("Water", 1.0, 2.0).unwrap();
        let propagator = Propagator::builder(particle, medium, EnergyCutSettings::no_cut())
            .process(Arc::new(LinearLoss::new(2.0, 0.0, EnergyCutSettings::no_cut()).unwrap()))
            .settings(exact())
            .build()
            .unwrap();
        let mut state = ParticleState::at_origin(propagator.particle(), 100.0);
        let mut rng = FastRng::new(1);
        let mut bank = SecondaryBank::new();
        match propagator.propagate(&mut state, 10.0, &mut rng, &mut bank) {
            PropagationOutcome::Reached { energy } => assert!((energy - 60.0).abs() < 1e-6),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_frozen_leg_without_rates_covers_distance() {
        let propagator =
            Propagator::builder(test_particle(), Medium::water(), EnergyCutSettings::no_cut())
                .settings(exact())
                .build()
                .unwrap();
        let mut state = ParticleState::at_origin(propagator.particle(), 50.0);
        let mut rng = FastRng::new(9);
        let mut bank = SecondaryBank::new();
        let (outcome, stats) =
            propagator.propagate_with_stats(&mut state, 7.5, &mut rng, &mut bank);
        assert_eq!(outcome, PropagationOutcome::Reached { energy: 50.0 });
        assert_eq!(stats.legs, 1);
        assert_eq!(stats.frozen_legs, 1);
    }

    #[test]
    fn test_absorbing_process_stops_particle() {
        let propagator =
            Propagator::builder(test_particle(), Medium::water(), EnergyCutSettings::no_cut())
                .process(Arc::new(ConstantRate::absorbing(0.5).unwrap()))
                .settings(exact())
                .build()
                .unwrap();
        let mut state = ParticleState::at_origin(propagator.particle(), 50.0);
        let mut rng = FastRng::new(4);
        let mut bank = SecondaryBank::new();
        let (outcome, stats) =
            propagator.propagate_with_stats(&mut state, 1e6, &mut rng, &mut bank);
        match outcome {
            PropagationOutcome::StoppedEarly { distance } => assert!(distance > 0.0),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(stats.interactions, 1);
        assert_eq!(bank.len(), 1);
        let record = bank.pop().unwrap();
        assert_eq!(record.energy, 50.0);
        assert_eq!(state.energy, 1.0);
    }

    #[test]
    fn test_decay_marks_particle() {
        let muon = ParticleDef::muon();
        let propagator =
            Propagator::builder(muon, Medium::water(), EnergyCutSettings::no_cut())
                .process(Arc::new(LinearLoss::new(2.0, 0.0, EnergyCutSettings::no_cut()).unwrap()))
                .decay(Arc::new(LifetimeDecay::muon()))
                .settings(exact())
                .build()
                .unwrap();
        let mut rng = FastRng::new(11);
        let mut decays = 0;
        for _ in 0..20 {
            // range ~47 cm against a decay length of about 1 km
            let mut state = ParticleState::at_origin(propagator.particle(), 200.0);
            let mut bank = SecondaryBank::new();
            let outcome = propagator.propagate(&mut state, 1e9, &mut rng, &mut bank);
            assert!(matches!(outcome, PropagationOutcome::StoppedEarly { .. }));
            if state.decayed {
                decays += 1;
                assert_eq!(bank.len(), 3);
                assert!(bank.iter().all(|s| matches!(s.kind, SecondaryKind::DecayProduct(_))));
            } else {
                assert_eq!(state.energy, propagator.particle().low);
            }
        }
        assert!(decays < 5);
    }

    #[test]
    fn test_build_rejects_low_at_mass_for_decay() {
        let particle = ParticleDef::new("heavy", 100.0, -1.0, Some(1e-6), 100.0).unwrap();
        let result = Propagator::builder(particle, Medium::water(), EnergyCutSettings::no_cut())
            .decay(Arc::new(LifetimeDecay::muon()))
            .settings(exact())
            .build();
        assert!(matches!(result, Err(PropagationError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_same_processes() {
        let a = continuous_only(2.0, 0.0);
        let b = continuous_only(2.0, 0.0);
        let c = continuous_only(2.0, 0.1);
        assert!(a.same_processes(&b));
        assert!(!a.same_processes(&c));
    }

    #[test]
    fn test_dead_particle_is_not_moved() {
        let propagator = continuous_only(2.0, 0.0);
        let mut state = ParticleState::at_origin(propagator.particle(), 1.0);
        let mut rng = FastRng::new(1);
        let mut bank = SecondaryBank::new();
        assert_eq!(
            propagator.propagate(&mut state, 10.0, &mut rng, &mut bank),
            PropagationOutcome::StoppedEarly { distance: 0.0 }
        );
        assert_eq!(state.propagated_distance, 0.0);
    }
}
