use thiserror::Error;

/// Errors raised while building a flux-aligned grid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("Flux interval is degenerate: psi_0 = psi_1 = {psi}.")]
    DegenerateInterval { psi: f64 },

    #[error("Point ({r}, {z}) is a critical point of psi; no flux surface passes through it.")]
    CriticalPoint { r: f64, z: f64 },

    #[error("{stage} did not converge within {steps} steps (error {error:e}).")]
    NotConverged {
        stage: &'static str,
        steps: usize,
        error: f64,
    },

    #[error("{stage} produced a non-finite value; is the seed inside the first flux surface?")]
    NonFinite { stage: &'static str },

    #[error("Invalid sample sequence: {reason}.")]
    InvalidSamples { reason: String },

    #[error("Invalid settings: {reason}.")]
    InvalidSettings { reason: String },

    #[error("Coordinate Jacobian vanishes at grid index {index}.")]
    Degenerate { index: usize },

    #[error("Quadrature rule could not be built: {0}.")]
    Quadrature(String),
}

pub type Result<T> = std::result::Result<T, GridError>;
