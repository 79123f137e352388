// First, import any modules and re-export the types for Rust usage
mod bank;
mod config;
mod cuts;
mod decay;
mod displacement;
mod error;
mod fast_rng;
mod fingerprint;
mod integral;
mod interpolant;
mod medium;
mod particle;
mod process;
mod processes;
mod propagator;
mod randomizer;
mod sampler;
mod scattering;
mod settings;
mod table_cache;
mod tracking;

pub use bank::{Secondary, SecondaryBank, SecondaryKind, SecondarySink};
pub use config::{Config, TableEncoding, BIG_ENERGY, DEFAULT_INTERPOLATION_NODES};
pub use cuts::EnergyCutSettings;
pub use decay::{DecayProduct, DecayProvider, LifetimeDecay};
pub use displacement::DisplacementSolver;
pub use error::PropagationError;
pub use fast_rng::FastRng;
pub use fingerprint::{Fingerprint, TableKey};
pub use integral::{Integral, INTEGRAL_PRECISION};
pub use interpolant::Interpolant;
pub use medium::Medium;
pub use particle::{ParticleDef, ParticleState, SPEED_OF_LIGHT};
pub use process::{same_processes, CrossSectionProcess, ProcessDescriptor, ProcessKind};
pub use processes::{ConstantRate, LinearLoss};
pub use propagator::{
    LegStats, PropagationOutcome, Propagator, PropagatorBuilder, COMPUTER_PRECISION,
};
pub use randomizer::{ContinuousRandomizer, GaussianRandomizer};
pub use sampler::{sample_stochastic_loss, StochasticEvent, StochasticLoss};
pub use scattering::{Deflection, Scattering, StraightLine};
pub use settings::{PropagationSettings, MAX_NO_EVENT_RETRIES};
pub use table_cache::{
    clear_table_registry, is_registered, load_tables, obtain_tables, store_tables, table_path,
    Direction, KernelTable, Stored, TableSet,
};
pub use tracking::{Kernel, ProcessSet, TrackingIntegral, TrackingState, HALF_PRECISION};
