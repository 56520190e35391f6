//! Configuration Module
//!
//! Run configuration for simulations:
//! - Algorithm, privacy and channel settings
//! - Data heterogeneity tags
//! - Privacy horizon lookup table

pub mod horizon;
pub mod simulation;

pub use horizon::{HorizonEntry, HorizonTable, DEFAULT_HORIZON};
pub use simulation::{Algorithm, ChannelConfig, PrivacyMode, SimulationConfig, Similarity};
