//! Differential privacy accounting for local training.
//!
//! Gaussian mechanism under advanced composition over the protocol horizon:
//!
//! `sigma_g = 4 q_u q_s sqrt(K T ln(2 T q_u / delta) ln(2 / delta)) / epsilon`
//!
//! where `q_u` is the user sampling ratio, `q_s` the per-step sample ratio, `K`
//! the number of local updates and `T` the horizon.

use crate::config::SimulationConfig;
use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Inputs of the Gaussian mechanism noise scale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianMechanism {
    /// Target epsilon
    pub epsilon: f64,
    /// Target delta
    pub delta: f64,
    /// Fraction of participants per round
    pub user_ratio: f64,
    /// Fraction of a shard per local step
    pub sample_ratio: f64,
    /// Local updates per round
    pub local_updates: usize,
    /// Protocol horizon in rounds
    pub horizon: usize,
}

impl GaussianMechanism {
    /// Build the mechanism for a configuration and the loaded population.
    ///
    /// `delta` is `1 / (participants * average samples)`, i.e. one over the
    /// total number of training samples.
    pub fn from_config(config: &SimulationConfig, total_train_samples: usize) -> Result<Self> {
        if total_train_samples == 0 {
            return Err(Error::InvalidConfig(
                "privacy accounting needs at least one training sample".to_string(),
            ));
        }
        Ok(Self {
            epsilon: config.epsilon_target,
            delta: 1.0 / total_train_samples as f64,
            user_ratio: config.user_ratio,
            sample_ratio: config.sample_ratio,
            local_updates: config.local_updates,
            horizon: config.horizon.lookup(&config.dataset, config.local_updates),
        })
    }

    /// Per-step gradient noise multiplier.
    pub fn sigma_g(&self) -> Result<f64> {
        if self.epsilon <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "delta must be in (0, 1), got {}",
                self.delta
            )));
        }

        let t = self.horizon as f64;
        let composition = (2.0 * t * self.user_ratio / self.delta).ln();
        let tail = (2.0 / self.delta).ln();
        let radicand = self.local_updates as f64 * t * composition * tail;
        if !(radicand >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "privacy parameters give a negative variance term: {}",
                radicand
            )));
        }

        Ok(4.0 * self.user_ratio * self.sample_ratio * radicand.sqrt() / self.epsilon)
    }
}
