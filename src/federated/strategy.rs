//! Algorithm variants.
//!
//! FedAvg and FedSGD differ only in the local batch; SCAFFOLD additionally
//! keeps per-participant control variates `c_i` and a global control `c`, and
//! corrects every local step by `c - c_i`.

use crate::config::Algorithm;
use crate::core::{Error, Result};
use crate::federated::participant::{BatchMode, Participant};
use crate::model::{ModelParams, Objective};

/// Control variates of the SCAFFOLD family.
#[derive(Clone, Debug)]
pub struct ControlVariates {
    /// Global control `c`
    pub global: ModelParams,
    /// Per-participant controls `c_i`, indexed like the participants
    pub local: Vec<ModelParams>,
}

impl ControlVariates {
    /// All controls at zero.
    pub fn zeros(template: &ModelParams, participants: usize) -> Self {
        Self {
            global: template.zeros_like(),
            local: vec![template.zeros_like(); participants],
        }
    }

    /// `c_i` = full-shard gradient at `params`, `c` = their mean.
    pub fn warm(objective: &dyn Objective, participants: &[Participant], params: &ModelParams) -> Result<Self> {
        if participants.is_empty() {
            return Err(Error::EmptyPool);
        }
        let local: Vec<ModelParams> = participants
            .iter()
            .map(|p| p.full_gradient(objective, params))
            .collect();
        let mut global = params.zeros_like();
        for c_i in &local {
            global.add_scaled(c_i, 1.0 / participants.len() as f32)?;
        }
        Ok(Self { global, local })
    }

    /// `c - c_i` for participant `index`.
    pub fn correction(&self, index: usize) -> Result<ModelParams> {
        let c_i = self.local.get(index).ok_or_else(|| {
            Error::InvalidConfig(format!("no control variate for participant {}", index))
        })?;
        self.global.difference(c_i)
    }

    /// Update the controls of the participants that trained this round.
    ///
    /// `c_i+ = c_i - c - delta_i / (K lr_i)` and `c += (1/N) sum (c_i+ - c_i)`
    /// with `N` the total number of participants.
    pub fn update(&mut self, trained: &[(usize, &ModelParams, f32)], local_updates: usize) -> Result<()> {
        if local_updates == 0 {
            return Ok(());
        }
        let n = self.local.len() as f32;
        let mut global_change = self.global.zeros_like();

        for (index, delta, lr) in trained {
            let c_i = self.local.get_mut(*index).ok_or_else(|| {
                Error::InvalidConfig(format!("no control variate for participant {}", index))
            })?;
            let mut change = self.global.clone();
            change.scale(-1.0);
            change.add_scaled(delta, -1.0 / (local_updates as f32 * lr))?;
            c_i.add_scaled(&change, 1.0)?;
            global_change.add_scaled(&change, 1.0 / n)?;
        }

        self.global.add_scaled(&global_change, 1.0)
    }
}

/// Algorithm state for a run.
#[derive(Clone, Debug)]
pub enum Strategy {
    /// Minibatch local SGD
    FedAvg,
    /// Full-batch local steps
    FedSgd,
    /// Control-variate corrected local SGD
    Scaffold(ControlVariates),
}

impl Strategy {
    /// Build the strategy of `algorithm`; warm start needs the participants.
    pub fn new(
        algorithm: Algorithm,
        objective: &dyn Objective,
        participants: &[Participant],
        init: &ModelParams,
    ) -> Result<Self> {
        Ok(match algorithm {
            Algorithm::FedAvg => Strategy::FedAvg,
            Algorithm::FedSgd => Strategy::FedSgd,
            Algorithm::Scaffold => {
                Strategy::Scaffold(ControlVariates::zeros(init, participants.len()))
            }
            Algorithm::ScaffoldWarm => {
                Strategy::Scaffold(ControlVariates::warm(objective, participants, init)?)
            }
        })
    }

    /// Local batch of every step.
    pub fn batch_mode(&self, sample_ratio: f64) -> BatchMode {
        match self {
            Strategy::FedSgd => BatchMode::Full,
            _ => BatchMode::Ratio(sample_ratio),
        }
    }

    /// Step correction for participant `index`.
    pub fn correction(&self, index: usize) -> Result<Option<ModelParams>> {
        match self {
            Strategy::Scaffold(controls) => controls.correction(index).map(Some),
            _ => Ok(None),
        }
    }

    /// Post-training state update.
    pub fn after_round(&mut self, trained: &[(usize, &ModelParams, f32)], local_updates: usize) -> Result<()> {
        match self {
            Strategy::Scaffold(controls) => controls.update(trained, local_updates),
            _ => Ok(()),
        }
    }

    /// Norm of the global control, for control-variate strategies.
    pub fn control_norm(&self) -> Option<f64> {
        match self {
            Strategy::Scaffold(controls) => Some(controls.global.norm()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{generate, SyntheticConfig};
    use crate::model::{MclrLogistic, ParamTensor};

    fn params(values: &[f32]) -> ModelParams {
        ModelParams::new(vec![ParamTensor::from_values(&[values.len()], values.to_vec()).unwrap()])
    }

    fn participants(objective: &MclrLogistic) -> Vec<Participant> {
        let init = objective.init_params();
        generate(&SyntheticConfig {
            num_users: 3,
            samples_per_user: 10,
            dim_input: 4,
            dim_output: 3,
            alpha: 1.0,
            beta: 1.0,
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|p| Participant::new(p, &init, 0.1))
        .collect()
    }

    #[test]
    fn test_batch_modes() {
        assert_eq!(Strategy::FedSgd.batch_mode(0.1), BatchMode::Full);
        assert_eq!(Strategy::FedAvg.batch_mode(0.1), BatchMode::Ratio(0.1));
    }

    #[test]
    fn test_plain_strategies_have_no_controls() {
        assert!(Strategy::FedAvg.correction(0).unwrap().is_none());
        assert!(Strategy::FedSgd.control_norm().is_none());
    }

    #[test]
    fn test_control_update_rule() {
        let mut controls = ControlVariates {
            global: params(&[1.0, 0.0]),
            local: vec![params(&[0.0, 0.0]), params(&[2.0, 2.0])],
        };
        let delta = params(&[-2.0, 4.0]);
        // K = 2, lr = 0.5: delta / (K lr) = delta
        controls.update(&[(0, &delta, 0.5)], 2).unwrap();

        // c_0+ = 0 - (1, 0) - (-2, 4) = (1, -4)
        assert_eq!(controls.local[0].tensors[0].values, vec![1.0, -4.0]);
        // c += (1/2) (c_0+ - c_0) = (1, 0) + (0.5, -2)
        assert_eq!(controls.global.tensors[0].values, vec![1.5, -2.0]);
        assert_eq!(controls.local[1].tensors[0].values, vec![2.0, 2.0]);
    }

    #[test]
    fn test_correction_is_global_minus_local() {
        let controls = ControlVariates {
            global: params(&[1.0, 1.0]),
            local: vec![params(&[0.5, 2.0])],
        };
        let correction = controls.correction(0).unwrap();
        assert_eq!(correction.tensors[0].values, vec![0.5, -1.0]);
        assert!(controls.correction(3).is_err());
    }

    #[test]
    fn test_cold_start_zero_controls() {
        let objective = MclrLogistic::new(4, 3);
        let users = participants(&objective);
        let strategy = Strategy::new(Algorithm::Scaffold, &objective, &users, &objective.init_params()).unwrap();
        assert_eq!(strategy.control_norm(), Some(0.0));
    }

    #[test]
    fn test_warm_start_mean_of_gradients() {
        let objective = MclrLogistic::new(4, 3);
        let users = participants(&objective);
        let init = objective.init_params();
        let controls = ControlVariates::warm(&objective, &users, &init).unwrap();

        let mut mean = init.zeros_like();
        for user in &users {
            mean.add_scaled(&user.full_gradient(&objective, &init), 1.0 / 3.0).unwrap();
        }
        let gap = controls.global.difference(&mean).unwrap();
        assert!(gap.norm() < 1e-6);
        assert!(controls.global.norm() > 0.0);
        assert_eq!(controls.local.len(), 3);
    }
}
