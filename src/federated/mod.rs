//! Federated Learning Module
//!
//! Round-based federated optimization over simulated participants:
//! - Participant selection (seeded ratio or channel threshold)
//! - Local training with optional differential privacy
//! - Sample-weighted delta aggregation
//! - Wireless channel noise injection
//! - FedAvg, FedSGD and SCAFFOLD variants

pub mod aggregator;
pub mod channel;
pub mod coordinator;
pub mod dissimilarity;
pub mod optimum;
pub mod participant;
pub mod privacy;
pub mod selection;
pub mod simulation;
pub mod strategy;

pub use aggregator::{aggregation_weights, DeltaAggregator};
pub use channel::{ChannelModel, Rayleigh};
pub use coordinator::{Coordinator, RoundState, GLOBAL_LEARNING_RATE};
pub use dissimilarity::Dissimilarity;
pub use optimum::find_optimum;
pub use participant::{BatchMode, DpClip, LocalPlan, Participant};
pub use privacy::GaussianMechanism;
pub use selection::SelectionPolicy;
pub use simulation::{compute_optimum, simulate, simulate_with_partitions, SimulationReport};
pub use strategy::{ControlVariates, Strategy};
