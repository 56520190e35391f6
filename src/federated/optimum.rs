//! Centralized reference optimum.

use crate::core::{Error, Result, Sample};
use crate::data::UserPartition;
use crate::model::{ModelParams, Objective};
use tracing::{debug, info};

/// Full-batch gradient descent on the union of every train shard.
pub fn find_optimum(
    objective: &dyn Objective,
    partitions: &[UserPartition],
    iterations: usize,
    learning_rate: f32,
) -> Result<ModelParams> {
    let samples: Vec<&Sample> = partitions.iter().flat_map(|p| p.train.iter()).collect();
    if samples.is_empty() {
        return Err(Error::EmptyPool);
    }

    let mut params = objective.init_params();
    let mut loss = 0.0;
    for iteration in 0..iterations {
        let (grad, batch_loss) = objective.mean_gradient(&params, &samples);
        params.add_scaled(&grad, -learning_rate)?;
        loss = batch_loss;
        if iteration % 100 == 0 {
            debug!(iteration, loss, "Optimum search");
        }
    }

    info!(
        iterations,
        samples = samples.len(),
        loss,
        "Reference optimum found"
    );
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{generate, SyntheticConfig};
    use crate::model::MclrLogistic;

    #[test]
    fn test_optimum_reduces_loss() {
        let objective = MclrLogistic::new(4, 3);
        let parts = generate(&SyntheticConfig {
            num_users: 4,
            samples_per_user: 25,
            dim_input: 4,
            dim_output: 3,
            ..Default::default()
        })
        .unwrap();
        let all: Vec<Sample> = parts.iter().flat_map(|p| p.train.clone()).collect();

        let before = objective.evaluate(&objective.init_params(), &all).loss;
        let optimum = find_optimum(&objective, &parts, 200, 0.5).unwrap();
        let after = objective.evaluate(&optimum, &all).loss;
        assert!(after < before);
    }

    #[test]
    fn test_empty_pool() {
        let objective = MclrLogistic::new(4, 3);
        assert!(matches!(
            find_optimum(&objective, &[], 10, 0.1),
            Err(Error::EmptyPool)
        ));
    }
}
