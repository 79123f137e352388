// Error taxonomy for the propagation engine

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by table handling, quadrature and context construction.
///
/// Only configuration-level problems escape to the caller of
/// [`crate::Propagator::propagate`]; the numerical variants are absorbed
/// inside a propagation call and only show up when the lower-level
/// components are used directly.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// Quadrature did not converge or the integrand was degenerate
    /// (zero or negative dE/dx, non-finite values).
    #[error("integration failed on [{lower:e}, {upper:e}]: {reason}")]
    IntegrationFailure {
        lower: f64,
        upper: f64,
        reason: String,
    },

    /// No persisted table exists for the fingerprint.
    #[error("no interpolation table stored at {0}")]
    TableMiss(PathBuf),

    /// A persisted table exists but could not be decoded or validated.
    #[error("interpolation table {path} is corrupted: {detail}")]
    TableCorrupted { path: PathBuf, detail: String },

    /// The table could not be persisted; it stays in memory.
    #[error("failed to write interpolation table {path}: {source}")]
    TableWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A process tag that the fingerprinting layer does not know about.
    #[error("unknown process type '{0}'")]
    UnknownProcessType(String),

    /// A fingerprint string that is not a 16 digit hex number.
    #[error("malformed fingerprint '{0}'")]
    MalformedFingerprint(String),

    /// Inconsistent particle, medium, cut or settings values.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PropagationError {
    pub(crate) fn integration(lower: f64, upper: f64, reason: impl Into<String>) -> Self {
        PropagationError::IntegrationFailure {
            lower,
            upper,
            reason: reason.into(),
        }
    }
}
