//! Error types for fedsim.

use thiserror::Error;

/// Result type alias for fedsim operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running a simulation.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Unknown privacy mode: {0}")]
    UnknownPrivacyMode(String),

    // Dataset errors
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Malformed dataset: {0}")]
    MalformedDataset(String),

    #[error("Participant pool is empty")]
    EmptyPool,

    // Numeric errors
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Total sample weight of the selected participants is zero in round {0}")]
    ZeroSampleWeight(usize),

    #[error("Maximum delta norm is zero in round {0}, channel scaling undefined")]
    ZeroDeltaNorm(usize),

    #[error("Degenerate communication threshold: {0}")]
    DegenerateThreshold(f64),

    #[error("Distribution error: {0}")]
    Distribution(String),

    #[error("Non-finite value in metric series {0}")]
    NonFiniteMetric(String),

    // Persistence errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<rand_distr::NormalError> for Error {
    fn from(err: rand_distr::NormalError) -> Self {
        Error::Distribution(err.to_string())
    }
}

impl From<rand_distr::WeibullError> for Error {
    fn from(err: rand_distr::WeibullError) -> Self {
        Error::Distribution(err.to_string())
    }
}
