//! Common types used across fedsim modules.

use serde::{Deserialize, Serialize};

/// Index of a communication round.
pub type RoundIndex = usize;

/// Index of an independent repeat of a simulation.
pub type RunId = usize;

/// A labeled example: feature vector and class index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Input features
    pub features: Vec<f32>,
    /// Class label
    pub label: usize,
}

impl Sample {
    /// Create a new sample.
    pub fn new(features: Vec<f32>, label: usize) -> Self {
        Self { features, label }
    }
}

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Euclidean norm of a flat slice, accumulated in f64.
pub fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|v| (*v as f64) * (*v as f64))
        .sum::<f64>()
        .sqrt()
}
