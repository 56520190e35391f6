//! Model Module
//!
//! Parameter tensors and local objectives:
//! - Ordered parameter tensors shared by coordinator and participants
//! - Objective trait for per-sample loss and gradients
//! - Multinomial logistic regression

pub mod mclr;
pub mod objective;
pub mod params;

pub use mclr::MclrLogistic;
pub use objective::{Evaluation, Objective};
pub use params::{ModelParams, ParamTensor};

use crate::config::SimulationConfig;
use crate::core::{Error, Result};

/// Build the objective named by the configuration's model tag.
pub fn build_objective(config: &SimulationConfig) -> Result<Box<dyn Objective>> {
    match config.model.as_str() {
        "mclr" => Ok(Box::new(
            MclrLogistic::new(config.dim_input, config.dim_output)
                .with_weight_decay(config.weight_decay),
        )),
        other => Err(Error::InvalidConfig(format!(
            "unsupported model architecture: {}",
            other
        ))),
    }
}
