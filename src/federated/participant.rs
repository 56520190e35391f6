//! Simulated participant holding a private data shard.
//!
//! Participants never share samples: they receive the global model, run local
//! steps on their own train shard and expose only the resulting delta.

use crate::core::{Result, Sample};
use crate::data::UserPartition;
use crate::model::{Evaluation, ModelParams, Objective};
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Samples drawn per local step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BatchMode {
    /// Whole train shard each step
    Full,
    /// Fraction of the shard, drawn without replacement
    Ratio(f64),
}

impl BatchMode {
    /// Batch size for a shard of `shard_len` samples.
    pub fn batch_size(&self, shard_len: usize) -> usize {
        match self {
            BatchMode::Full => shard_len,
            BatchMode::Ratio(ratio) => {
                ((ratio * shard_len as f64).round() as usize).clamp(1, shard_len.max(1))
            }
        }
    }
}

/// Per-sample clipping and Gaussian noise for a local step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DpClip {
    /// Noise multiplier
    pub sigma_g: f64,
    /// Clipping bound of each per-sample gradient
    pub max_norm: f64,
}

/// How a participant trains during one round.
#[derive(Clone, Copy, Debug)]
pub struct LocalPlan {
    /// Local steps
    pub local_updates: usize,
    /// Batch drawn per step
    pub batch: BatchMode,
    /// Differentially private steps when set
    pub dp: Option<DpClip>,
}

/// Outcome of one round of local training.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalUpdate {
    /// L2 norm of the delta
    pub delta_norm: f64,
    /// Mean minibatch loss over the local steps
    pub loss: f64,
}

/// A simulated participant.
#[derive(Clone, Debug)]
pub struct Participant {
    /// Participant ID
    pub id: String,
    train: Vec<Sample>,
    test: Vec<Sample>,
    /// Working copy trained locally
    local: ModelParams,
    /// Global model received at broadcast
    received: ModelParams,
    /// `local - received` after training
    delta: ModelParams,
    /// Local step size
    pub learning_rate: f32,
    /// Channel gain drawn for the current round
    pub channel_quality: Option<f64>,
}

impl Participant {
    /// Create a participant from its partition and the initial global model.
    pub fn new(partition: UserPartition, init: &ModelParams, learning_rate: f32) -> Self {
        Self {
            id: partition.id,
            train: partition.train,
            test: partition.test,
            local: init.clone(),
            received: init.clone(),
            delta: init.zeros_like(),
            learning_rate,
            channel_quality: None,
        }
    }

    /// Number of training samples.
    pub fn sample_count(&self) -> usize {
        self.train.len()
    }

    /// Train shard.
    pub fn train_data(&self) -> &[Sample] {
        &self.train
    }

    /// Replace local and received models with a copy of `global`.
    ///
    /// Clears the previous delta, so only participants trained this round
    /// report a non-zero one.
    pub fn set_parameters(&mut self, global: &ModelParams) -> Result<()> {
        self.local.copy_from(global)?;
        self.received.copy_from(global)?;
        self.delta.fill_zero();
        Ok(())
    }

    /// Current local model.
    pub fn local_model(&self) -> &ModelParams {
        &self.local
    }

    /// Delta of the last local training.
    pub fn delta(&self) -> &ModelParams {
        &self.delta
    }

    /// L2 norm of the last delta.
    pub fn delta_norm(&self) -> f64 {
        self.delta.norm()
    }

    /// Run the local steps of a round and compute the delta.
    ///
    /// `correction` is added to every step direction (control-variate drift
    /// correction).
    pub fn train<R: Rng + ?Sized>(
        &mut self,
        objective: &dyn Objective,
        plan: &LocalPlan,
        correction: Option<&ModelParams>,
        rng: &mut R,
    ) -> Result<LocalUpdate> {
        let batch_size = plan.batch.batch_size(self.train.len());
        let mut total_loss = 0.0;

        for _ in 0..plan.local_updates {
            let batch: Vec<&Sample> = if batch_size >= self.train.len() {
                self.train.iter().collect()
            } else {
                rand::seq::index::sample(rng, self.train.len(), batch_size)
                    .into_iter()
                    .map(|i| &self.train[i])
                    .collect()
            };

            let (mut grad, loss) = match &plan.dp {
                None => objective.mean_gradient(&self.local, &batch),
                Some(dp) => private_gradient(objective, &self.local, &batch, dp, rng)?,
            };
            if let Some(correction) = correction {
                grad.add_scaled(correction, 1.0)?;
            }
            self.local.add_scaled(&grad, -self.learning_rate)?;
            total_loss += loss;
        }

        self.delta = self.local.difference(&self.received)?;
        Ok(LocalUpdate {
            delta_norm: self.delta.norm(),
            loss: if plan.local_updates == 0 {
                0.0
            } else {
                total_loss / plan.local_updates as f64
            },
        })
    }

    /// Full-shard gradient of the training objective at `params`.
    pub fn full_gradient(&self, objective: &dyn Objective, params: &ModelParams) -> ModelParams {
        let batch: Vec<&Sample> = self.train.iter().collect();
        objective.mean_gradient(params, &batch).0
    }

    /// Accuracy and loss of `params` on the test shard.
    pub fn test_error_and_loss(&self, objective: &dyn Objective, params: &ModelParams) -> Evaluation {
        objective.evaluate(params, &self.test)
    }

    /// Accuracy and loss of `params` on the train shard.
    pub fn train_error_and_loss(&self, objective: &dyn Objective, params: &ModelParams) -> Evaluation {
        objective.evaluate(params, &self.train)
    }

    /// Multiply the local step size by `decay`.
    pub fn drop_lr(&mut self, decay: f32) {
        self.learning_rate *= decay;
    }
}

/// Clipped, noised mean gradient of a batch.
fn private_gradient<R: Rng + ?Sized>(
    objective: &dyn Objective,
    params: &ModelParams,
    batch: &[&Sample],
    dp: &DpClip,
    rng: &mut R,
) -> Result<(ModelParams, f64)> {
    let mut sum = params.zeros_like();
    let mut per_sample = params.zeros_like();
    let mut loss = 0.0;

    for sample in batch {
        per_sample.fill_zero();
        loss += objective.accumulate_gradient(params, sample, &mut per_sample);
        let norm = per_sample.norm();
        let clip = if norm > dp.max_norm {
            (dp.max_norm / norm) as f32
        } else {
            1.0
        };
        sum.add_scaled(&per_sample, clip)?;
    }

    let noise = Normal::new(0.0, dp.sigma_g * dp.max_norm)?;
    for value in sum.values_mut() {
        *value += noise.sample(rng) as f32;
    }

    let n = batch.len().max(1);
    sum.scale(1.0 / n as f32);
    objective.add_regularization(params, &mut sum);
    Ok((sum, loss / n as f64 + objective.regularization_loss(params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{generate, SyntheticConfig};
    use crate::model::MclrLogistic;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (MclrLogistic, Participant) {
        let objective = MclrLogistic::new(4, 3);
        let partition = generate(&SyntheticConfig {
            num_users: 1,
            samples_per_user: 40,
            dim_input: 4,
            dim_output: 3,
            ..Default::default()
        })
        .unwrap()
        .remove(0);
        let init = objective.init_params();
        let participant = Participant::new(partition, &init, 0.1);
        (objective, participant)
    }

    fn plan(dp: Option<DpClip>) -> LocalPlan {
        LocalPlan {
            local_updates: 5,
            batch: BatchMode::Ratio(0.25),
            dp,
        }
    }

    #[test]
    fn test_batch_size() {
        assert_eq!(BatchMode::Full.batch_size(40), 40);
        assert_eq!(BatchMode::Ratio(0.1).batch_size(40), 4);
        assert_eq!(BatchMode::Ratio(0.001).batch_size(40), 1);
        assert_eq!(BatchMode::Ratio(2.0).batch_size(40), 40);
    }

    #[test]
    fn test_delta_is_local_minus_received() {
        let (objective, mut participant) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        let update = participant.train(&objective, &plan(None), None, &mut rng).unwrap();

        let expected = participant.local_model().difference(&participant.received).unwrap();
        assert_eq!(participant.delta(), &expected);
        assert!((update.delta_norm - expected.norm()).abs() < 1e-9);
        assert!(update.delta_norm > 0.0);
    }

    #[test]
    fn test_set_parameters_is_deep_copy() {
        let (objective, mut participant) = setup();
        let mut global = objective.init_params();
        global.tensors[1].values[0] = 2.0;
        participant.set_parameters(&global).unwrap();

        global.tensors[1].values[0] = -7.0;
        assert_eq!(participant.local_model().tensors[1].values[0], 2.0);
    }

    #[test]
    fn test_set_parameters_shape_mismatch() {
        let (_, mut participant) = setup();
        let other = MclrLogistic::new(5, 3).init_params();
        assert!(participant.set_parameters(&other).is_err());
    }

    #[test]
    fn test_broadcast_clears_previous_delta() {
        let (objective, mut participant) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        participant.train(&objective, &plan(None), None, &mut rng).unwrap();
        assert!(participant.delta_norm() > 0.0);

        let global = participant.local_model().clone();
        participant.set_parameters(&global).unwrap();
        assert_eq!(participant.delta_norm(), 0.0);
        assert_eq!(participant.delta(), &global.zeros_like());
    }

    #[test]
    fn test_zero_local_updates_gives_zero_delta() {
        let (objective, mut participant) = setup();
        let mut rng = StdRng::seed_from_u64(3);
        let plan = LocalPlan {
            local_updates: 0,
            ..plan(None)
        };
        let update = participant.train(&objective, &plan, None, &mut rng).unwrap();
        assert_eq!(update.delta_norm, 0.0);
    }

    #[test]
    fn test_full_batch_deterministic() {
        let (objective, mut a) = setup();
        let mut b = a.clone();
        let plan = LocalPlan {
            batch: BatchMode::Full,
            ..plan(None)
        };
        a.train(&objective, &plan, None, &mut StdRng::seed_from_u64(1)).unwrap();
        b.train(&objective, &plan, None, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(a.delta(), b.delta());
    }

    #[test]
    fn test_correction_shifts_step() {
        let (objective, mut participant) = setup();
        let init = objective.init_params();
        let mut correction = init.zeros_like();
        for v in correction.values_mut() {
            *v = 1.0;
        }
        let plan = LocalPlan {
            local_updates: 1,
            batch: BatchMode::Full,
            dp: None,
        };
        let mut plain = participant.clone();
        plain.train(&objective, &plan, None, &mut StdRng::seed_from_u64(0)).unwrap();
        participant
            .train(&objective, &plan, Some(&correction), &mut StdRng::seed_from_u64(0))
            .unwrap();

        let shift = participant.delta().difference(plain.delta()).unwrap();
        assert!(shift.flatten().iter().all(|v| (v + 0.1).abs() < 1e-6));
    }

    #[test]
    fn test_dp_training_without_noise_clips() {
        let (objective, mut participant) = setup();
        let plan = LocalPlan {
            local_updates: 1,
            batch: BatchMode::Full,
            dp: Some(DpClip {
                sigma_g: 0.0,
                max_norm: 1e-3,
            }),
        };
        let update = participant
            .train(&objective, &plan, None, &mut StdRng::seed_from_u64(0))
            .unwrap();
        // Mean of clipped gradients is bounded by the clip norm.
        assert!(update.delta_norm <= 0.1 * 1e-3 + 1e-7);
    }

    #[test]
    fn test_dp_noise_changes_delta() {
        let (objective, participant) = setup();
        let dp = Some(DpClip {
            sigma_g: 1.0,
            max_norm: 1.0,
        });
        let mut a = participant.clone();
        let mut b = participant;
        a.train(&objective, &plan(dp), None, &mut StdRng::seed_from_u64(1)).unwrap();
        b.train(&objective, &plan(dp), None, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_ne!(a.delta(), b.delta());
    }

    #[test]
    fn test_drop_lr() {
        let (_, mut participant) = setup();
        participant.drop_lr(0.5);
        assert!((participant.learning_rate - 0.05).abs() < 1e-7);
    }

    #[test]
    fn test_evaluation_counts() {
        let (objective, participant) = setup();
        let params = objective.init_params();
        let train = participant.train_error_and_loss(&objective, &params);
        let test = participant.test_error_and_loss(&objective, &params);
        assert_eq!(train.samples, 40);
        assert_eq!(test.samples, 10);
        // Zero model: uniform softmax over three classes.
        assert!((train.loss - 3.0f64.ln()).abs() < 1e-5);
    }
}
