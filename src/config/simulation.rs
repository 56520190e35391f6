//! Simulation configuration.
//!
//! Configuration-driven algorithm, privacy and selection choice.

use crate::config::horizon::HorizonTable;
use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Federated optimization algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Local mini-batch SGD with weighted averaging
    #[serde(rename = "FedAvg")]
    FedAvg,
    /// One full-shard gradient step per local update
    #[serde(rename = "FedSGD")]
    FedSgd,
    /// Control-variate corrected local updates
    #[serde(rename = "SCAFFOLD")]
    Scaffold,
    /// SCAFFOLD with control variates initialized from full gradients
    #[serde(rename = "SCAFFOLD-warm")]
    ScaffoldWarm,
}

impl Algorithm {
    /// Whether the algorithm maintains control variates.
    pub fn uses_control_variates(&self) -> bool {
        matches!(self, Algorithm::Scaffold | Algorithm::ScaffoldWarm)
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::FedAvg
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::FedAvg => write!(f, "FedAvg"),
            Algorithm::FedSgd => write!(f, "FedSGD"),
            Algorithm::Scaffold => write!(f, "SCAFFOLD"),
            Algorithm::ScaffoldWarm => write!(f, "SCAFFOLD-warm"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "FedAvg" => Ok(Algorithm::FedAvg),
            "FedSGD" => Ok(Algorithm::FedSgd),
            "SCAFFOLD" => Ok(Algorithm::Scaffold),
            "SCAFFOLD-warm" => Ok(Algorithm::ScaffoldWarm),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Differential privacy mode for local training.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyMode {
    /// Plain optimizer step
    None,
    /// Clipped per-sample gradients with Gaussian noise
    Gaussian,
}

impl PrivacyMode {
    /// Whether DP training is active.
    pub fn is_active(&self) -> bool {
        matches!(self, PrivacyMode::Gaussian)
    }
}

impl Default for PrivacyMode {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivacyMode::None => write!(f, "None"),
            PrivacyMode::Gaussian => write!(f, "Gaussian"),
        }
    }
}

impl FromStr for PrivacyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(PrivacyMode::None),
            "Gaussian" => Ok(PrivacyMode::Gaussian),
            other => Err(Error::UnknownPrivacyMode(other.to_string())),
        }
    }
}

/// Data heterogeneity tag used to pick dataset files and key results.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// Identically distributed partitions
    Iid,
    /// Named similarity preset (1.0 means homogeneous)
    Level(f64),
    /// Synthetic `(alpha, beta)` heterogeneity pair
    Pair { alpha: f64, beta: f64 },
}

impl Similarity {
    /// Resolve the tag from an optional preset and an `(alpha, beta)` pair.
    ///
    /// Both knobs negative always means iid.
    pub fn resolve(preset: Option<f64>, alpha: f64, beta: f64) -> Self {
        if alpha < 0.0 && beta < 0.0 {
            return Similarity::Iid;
        }
        match preset {
            Some(level) => Similarity::Level(level),
            None => Similarity::Pair { alpha, beta },
        }
    }

    /// Whether the partition is homogeneous.
    pub fn is_homogeneous(&self) -> bool {
        match self {
            Similarity::Iid => true,
            Similarity::Level(level) => *level == 1.0,
            Similarity::Pair { .. } => false,
        }
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Self::Pair {
            alpha: 0.0,
            beta: 0.0,
        }
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Similarity::Iid => write!(f, "iid"),
            Similarity::Level(level) => write!(f, "{:?}", level),
            Similarity::Pair { alpha, beta } => write!(f, "({:?}, {:?})", alpha, beta),
        }
    }
}

/// Wireless channel model parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Receiver noise standard deviation
    pub sigma: f64,
    /// Transmit power budget
    pub power_control: f64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            power_control: 2500.0,
        }
    }
}

/// Full configuration of a simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Dataset name
    pub dataset: String,
    /// Algorithm variant
    pub algorithm: Algorithm,
    /// Local model architecture tag
    pub model: String,
    /// Input feature dimension
    pub dim_input: usize,
    /// Number of classes
    pub dim_output: usize,
    /// Configured participant population
    pub nb_users: usize,
    /// Configured samples per participant
    pub nb_samples: usize,
    /// Fraction of a shard used per local step
    pub sample_ratio: f64,
    /// Fraction of participants selected per round
    pub user_ratio: f64,
    /// L2 regularization strength
    pub weight_decay: f32,
    /// Base learning rate, divided by local updates
    pub learning_rate: f32,
    /// Per-sample gradient clipping bound
    pub max_norm: f32,
    /// Local steps per round
    pub local_updates: usize,
    /// Communication rounds
    pub num_glob_iters: usize,
    /// Data heterogeneity tag
    pub similarity: Similarity,
    /// Wireless analog aggregation with channel-threshold selection
    pub noise: bool,
    /// Channel model
    pub channel: ChannelConfig,
    /// Local differential privacy mode
    pub privacy: PrivacyMode,
    /// Target epsilon for the Gaussian mechanism
    pub epsilon_target: f64,
    /// Independent repeats
    pub times: usize,
    /// Run only this repeat index
    pub time: Option<usize>,
    /// Dataset variant number
    pub number: usize,
    /// Multiplicative learning-rate decay after each round
    pub lr_decay: f32,
    /// Seed for channel draws and noise; entropy when unset
    pub noise_seed: Option<u64>,
    /// Full-batch iterations used to find the reference optimum
    pub optimum_iters: usize,
    /// Root of the dataset tree
    pub data_dir: PathBuf,
    /// Output directory for results
    pub results_dir: PathBuf,
    /// Output directory for checkpoints
    pub models_dir: PathBuf,
    /// Protocol horizon lookup
    pub horizon: HorizonTable,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dataset: "Logistic".to_string(),
            algorithm: Algorithm::FedAvg,
            model: "mclr".to_string(),
            dim_input: 40,
            dim_output: 10,
            nb_users: 100,
            nb_samples: 200,
            sample_ratio: 0.1,
            user_ratio: 0.1,
            weight_decay: 0.0,
            learning_rate: 1.0,
            max_norm: 1.0,
            local_updates: 50,
            num_glob_iters: 250,
            similarity: Similarity::default(),
            noise: false,
            channel: ChannelConfig::default(),
            privacy: PrivacyMode::None,
            epsilon_target: 1.0,
            times: 1,
            time: None,
            number: 0,
            lr_decay: 1.0,
            noise_seed: None,
            optimum_iters: 1000,
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            models_dir: PathBuf::from("models"),
            horizon: HorizonTable::default(),
        }
    }
}

impl SimulationConfig {
    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: SimulationConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Participants selected per round under fixed-ratio selection.
    pub fn users_per_round(&self) -> usize {
        (self.nb_users as f64 * self.user_ratio) as usize
    }

    /// Range of repeat indices to execute.
    pub fn repeat_range(&self) -> std::ops::Range<usize> {
        match self.time {
            Some(time) => time..(time + 1).min(self.times),
            None => 0..self.times,
        }
    }

    /// Check invariants that would otherwise surface as NaN metrics.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.is_empty() {
            return Err(Error::InvalidConfig("dataset name is empty".to_string()));
        }
        if self.model != "mclr" {
            return Err(Error::InvalidConfig(format!(
                "unsupported model architecture: {}",
                self.model
            )));
        }
        if self.dim_input == 0 || self.dim_output < 2 {
            return Err(Error::InvalidConfig(
                "model needs at least one input and two classes".to_string(),
            ));
        }
        if !(self.sample_ratio > 0.0 && self.sample_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "sample_ratio must be in (0, 1], got {}",
                self.sample_ratio
            )));
        }
        if !(self.user_ratio >= 0.0 && self.user_ratio <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "user_ratio must be in [0, 1], got {}",
                self.user_ratio
            )));
        }
        if self.local_updates == 0 {
            return Err(Error::InvalidConfig(
                "local_updates must be positive".to_string(),
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(
                "learning_rate must be positive".to_string(),
            ));
        }
        if self.privacy.is_active() {
            if self.epsilon_target <= 0.0 {
                return Err(Error::InvalidConfig(
                    "epsilon_target must be positive with Gaussian privacy".to_string(),
                ));
            }
            if self.user_ratio == 0.0 {
                return Err(Error::InvalidConfig(
                    "user_ratio must be positive with Gaussian privacy".to_string(),
                ));
            }
            if self.max_norm <= 0.0 {
                return Err(Error::InvalidConfig(
                    "max_norm must be positive with Gaussian privacy".to_string(),
                ));
            }
        }
        if self.noise {
            if self.channel.power_control <= 0.0 {
                return Err(Error::InvalidConfig(
                    "power_control must be positive in noise mode".to_string(),
                ));
            }
            if self.users_per_round() == 0 {
                return Err(Error::InvalidConfig(
                    "noise mode needs a positive users_per_round".to_string(),
                ));
            }
        }
        if self.times == 0 {
            return Err(Error::InvalidConfig("times must be positive".to_string()));
        }
        if let Some(time) = self.time {
            if time >= self.times {
                return Err(Error::InvalidConfig(format!(
                    "selected repeat {} is out of range for {} repeats",
                    time, self.times
                )));
            }
        }
        Ok(())
    }
}
