//! # fedsim - Federated Learning Simulator
//!
//! A round-based federated optimization simulator providing:
//! - **Federated**: coordinator, participants, FedAvg / FedSGD / SCAFFOLD
//! - **Privacy**: Gaussian mechanism on local steps
//! - **Channel**: wireless analog aggregation with Rayleigh fading
//! - **Storage**: per-repeat metric series and model checkpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedsim::config::SimulationConfig;
//! use fedsim::data::{generate, SyntheticConfig};
//! use fedsim::federated::simulate_with_partitions;
//!
//! let config = SimulationConfig::default();
//! let partitions = generate(&SyntheticConfig::from_simulation(&config, 1)).unwrap();
//! let report = simulate_with_partitions(&config, partitions).unwrap();
//! println!("Completed repeats: {:?}", report.completed);
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod federated;
pub mod model;
pub mod monitoring;
pub mod storage;

pub use core::error::{Error, Result};
