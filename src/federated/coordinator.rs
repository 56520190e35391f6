//! Round-based federated coordinator.
//!
//! Owns the global model and every participant. Each round broadcasts the
//! global model, selects participants, trains them locally, folds their
//! deltas into the global model, optionally perturbs it with channel noise and
//! evaluates it over the whole population.

use crate::config::SimulationConfig;
use crate::core::{Result, RoundIndex, RunId};
use crate::data::{validate_partitions, UserPartition};
use crate::federated::aggregator::DeltaAggregator;
use crate::federated::channel::ChannelModel;
use crate::federated::dissimilarity::Dissimilarity;
use crate::federated::participant::{DpClip, LocalPlan, Participant};
use crate::federated::privacy::GaussianMechanism;
use crate::federated::selection::{self, SelectionPolicy};
use crate::federated::strategy::Strategy;
use crate::model::{ModelParams, Objective};
use crate::monitoring::{MetricsSeries, RoundSnapshot};
use crate::storage::{CheckpointKind, CheckpointStore, ResultKey, ResultStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

/// Server-side learning rate applied to the aggregated delta.
pub const GLOBAL_LEARNING_RATE: f32 = 1.0;

/// Transient state of one round.
#[derive(Clone, Debug)]
pub struct RoundState {
    /// Round index
    pub round_index: RoundIndex,
    /// Indices of the participants that trained
    pub selected: Vec<usize>,
    /// Weighted average of the selected deltas
    pub aggregated_delta: ModelParams,
    /// Largest delta norm among the selected
    pub max_delta_norm: f64,
    /// Channel threshold in noise mode
    pub communication_threshold: Option<f64>,
    /// Standard deviation of the injected channel noise
    pub channel_noise: Option<f64>,
}

/// Coordinator statistics.
#[derive(Clone, Debug, Default)]
pub struct CoordinatorStats {
    pub rounds_completed: u64,
    pub total_participations: u64,
    pub min_selected: Option<usize>,
    pub max_selected: usize,
}

/// Central coordinator of a simulated run.
pub struct Coordinator {
    /// Global model
    pub global: ModelParams,
    /// Next round to run
    pub round: RoundIndex,
    config: SimulationConfig,
    run_id: RunId,
    objective: Box<dyn Objective>,
    participants: Vec<Participant>,
    strategy: Strategy,
    selection: SelectionPolicy,
    aggregator: DeltaAggregator,
    /// DP noise multiplier when privacy is on
    sigma_g: Option<f64>,
    /// Per-participant train loss at the reference optimum
    optimum_losses: Option<Vec<f64>>,
    metrics: MetricsSeries,
    rng: StdRng,
    stats: CoordinatorStats,
}

impl Coordinator {
    /// Create a coordinator for repeat `run_id` over the given partitions.
    pub fn new(
        config: SimulationConfig,
        run_id: RunId,
        objective: Box<dyn Objective>,
        partitions: Vec<UserPartition>,
    ) -> Result<Self> {
        config.validate()?;
        validate_partitions(&partitions, config.dim_input, config.dim_output)?;

        let global = objective.init_params();
        let local_lr =
            config.learning_rate / (config.local_updates as f32 * GLOBAL_LEARNING_RATE);
        let participants: Vec<Participant> = partitions
            .into_iter()
            .map(|p| Participant::new(p, &global, local_lr))
            .collect();
        let total_users = participants.len();
        let total_train_samples: usize = participants.iter().map(|p| p.sample_count()).sum();
        let users_per_round = config.users_per_round().min(total_users);

        let selection = if config.noise {
            SelectionPolicy::ChannelThreshold(ChannelModel::new(
                users_per_round,
                total_users,
                &config.channel,
            )?)
        } else {
            SelectionPolicy::FixedRatio { users_per_round }
        };

        let sigma_g = if config.privacy.is_active() {
            Some(GaussianMechanism::from_config(&config, total_train_samples)?.sigma_g()?)
        } else {
            None
        };

        let strategy = Strategy::new(config.algorithm, objective.as_ref(), &participants, &global)?;
        let metrics = MetricsSeries::new(config.algorithm.uses_control_variates());
        let rng = match config.noise_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(run_id as u64)),
            None => StdRng::from_entropy(),
        };

        info!(
            run_id,
            algorithm = %config.algorithm,
            dataset = %config.dataset,
            similarity = %config.similarity,
            users = total_users,
            users_per_round,
            threshold = ?selection.communication_threshold(),
            sigma_g = ?sigma_g,
            "Coordinator created"
        );

        Ok(Self {
            global,
            round: 0,
            config,
            run_id,
            objective,
            participants,
            strategy,
            selection,
            aggregator: DeltaAggregator::new(GLOBAL_LEARNING_RATE),
            sigma_g,
            optimum_losses: None,
            metrics,
            rng,
            stats: CoordinatorStats::default(),
        })
    }

    /// Measure the loss gap against a reference optimum.
    pub fn with_optimum(mut self, optimum: &ModelParams) -> Result<Self> {
        self.global.check_compatible(optimum)?;
        let objective = self.objective.as_ref();
        self.optimum_losses = Some(
            self.participants
                .iter()
                .map(|p| p.train_error_and_loss(objective, optimum).loss)
                .collect(),
        );
        Ok(self)
    }

    /// Copy the global model into every participant.
    pub fn broadcast(&mut self) -> Result<()> {
        for participant in &mut self.participants {
            participant.set_parameters(&self.global)?;
        }
        Ok(())
    }

    /// Choose the participants of the current round, in collection order.
    pub fn select(&mut self) -> Vec<usize> {
        match &self.selection {
            SelectionPolicy::FixedRatio { users_per_round } => selection::select_fixed_ratio(
                self.participants.len(),
                *users_per_round,
                self.round,
                self.run_id,
            ),
            SelectionPolicy::ChannelThreshold(channel) => {
                let qualities =
                    selection::draw_qualities(channel, self.participants.len(), &mut self.rng);
                for (participant, quality) in self.participants.iter_mut().zip(qualities.iter()) {
                    participant.channel_quality = Some(*quality);
                }
                selection::select_by_quality(&qualities, channel.threshold)
            }
        }
    }

    /// Train the selected participants; returns their delta norms.
    pub fn local_train(&mut self, selected: &[usize]) -> Result<Vec<f64>> {
        let plan = LocalPlan {
            local_updates: self.config.local_updates,
            batch: self.strategy.batch_mode(self.config.sample_ratio),
            dp: self.sigma_g.map(|sigma_g| DpClip {
                sigma_g,
                max_norm: self.config.max_norm as f64,
            }),
        };

        let mut norms = Vec::with_capacity(selected.len());
        for &index in selected {
            let correction = self.strategy.correction(index)?;
            let participant = &mut self.participants[index];
            let update = participant.train(
                self.objective.as_ref(),
                &plan,
                correction.as_ref(),
                &mut self.rng,
            )?;
            debug!(
                round = self.round,
                participant = %participant.id,
                delta_norm = update.delta_norm,
                loss = update.loss,
                "Local training done"
            );
            norms.push(update.delta_norm);
        }

        let trained: Vec<(usize, &ModelParams, f32)> = selected
            .iter()
            .map(|&i| {
                let p = &self.participants[i];
                (i, p.delta(), p.learning_rate)
            })
            .collect();
        self.strategy.after_round(&trained, self.config.local_updates)?;

        for &index in selected {
            self.participants[index].drop_lr(self.config.lr_decay);
        }
        Ok(norms)
    }

    /// Fold the selected deltas into the global model.
    pub fn aggregate(&mut self, selected: Vec<usize>, norms: &[f64]) -> Result<RoundState> {
        for &index in &selected {
            let participant = &self.participants[index];
            self.aggregator.submit(
                &participant.id,
                participant.delta().clone(),
                participant.sample_count(),
            )?;
        }
        let aggregated_delta = self.aggregator.apply(&mut self.global)?;
        self.aggregator.next_round();

        let max_delta_norm = norms.iter().cloned().fold(0.0, f64::max);
        self.metrics.record_norm(max_delta_norm);
        if let Some(norm) = self.strategy.control_norm() {
            self.metrics.record_control_norm(norm);
        }

        self.stats.total_participations += selected.len() as u64;
        self.stats.max_selected = self.stats.max_selected.max(selected.len());
        self.stats.min_selected = Some(
            self.stats
                .min_selected
                .map_or(selected.len(), |m| m.min(selected.len())),
        );

        Ok(RoundState {
            round_index: self.round,
            selected,
            aggregated_delta,
            max_delta_norm,
            communication_threshold: self.selection.communication_threshold(),
            channel_noise: None,
        })
    }

    /// Perturb the global model with receiver noise in noise mode.
    pub fn inject_channel_noise(&mut self, state: &mut RoundState) -> Result<()> {
        if let SelectionPolicy::ChannelThreshold(channel) = &self.selection {
            let scale =
                channel.noise_scale(state.max_delta_norm, state.selected.len(), state.round_index)?;
            channel.inject(&mut self.global, scale, &mut self.rng)?;
            state.channel_noise = Some(scale);
        }
        Ok(())
    }

    /// Evaluate the global model over every participant and record it.
    pub fn evaluate(&mut self) -> Result<RoundSnapshot> {
        let objective = self.objective.as_ref();
        let n = self.participants.len() as f64;

        let mut test_correct = 0;
        let mut test_samples = 0;
        let mut test_loss = 0.0;
        let mut train_correct = 0;
        let mut train_samples = 0;
        let mut train_loss = 0.0;
        let mut train_loss_gap = 0.0;
        let mut gradients = Vec::with_capacity(self.participants.len());

        for (i, participant) in self.participants.iter().enumerate() {
            let test = participant.test_error_and_loss(objective, &self.global);
            test_correct += test.correct;
            test_samples += test.samples;
            test_loss += test.loss;

            let train = participant.train_error_and_loss(objective, &self.global);
            train_correct += train.correct;
            train_samples += train.samples;
            train_loss += train.loss;
            train_loss_gap += match &self.optimum_losses {
                Some(losses) => train.loss - losses[i],
                None => train.loss,
            };

            gradients.push(participant.full_gradient(objective, &self.global).flatten());
        }

        let snapshot = RoundSnapshot {
            round: self.round,
            test_accuracy: ratio(test_correct, test_samples),
            test_loss: test_loss / n,
            train_accuracy: ratio(train_correct, train_samples),
            train_loss: train_loss / n,
            train_loss_gap: train_loss_gap / n,
            dissimilarity: Dissimilarity::compute(&gradients)?,
            timestamp: crate::core::now(),
        };

        let use_gap = self.records_loss_gap();
        self.metrics.record(&snapshot, use_gap);
        snapshot.log();
        Ok(snapshot)
    }

    /// Run one full round.
    pub fn run_round(&mut self) -> Result<RoundState> {
        self.broadcast()?;
        let selected = self.select();
        debug!(round = self.round, selected = selected.len(), "Participants selected");

        let norms = self.local_train(&selected)?;
        let mut state = self.aggregate(selected, &norms)?;
        self.inject_channel_noise(&mut state)?;
        self.evaluate()?;

        info!(
            round = state.round_index,
            selected = state.selected.len(),
            max_delta_norm = state.max_delta_norm,
            channel_noise = ?state.channel_noise,
            "Round complete"
        );

        self.stats.rounds_completed += 1;
        self.round += 1;
        Ok(state)
    }

    /// Run every configured round.
    pub fn train(&mut self) -> Result<&MetricsSeries> {
        for _ in 0..self.config.num_glob_iters {
            self.run_round()?;
        }
        Ok(&self.metrics)
    }

    /// Persist metrics, norms and the final global model.
    pub fn finalize(&self, results: &ResultStore, checkpoints: &CheckpointStore) -> Result<()> {
        let key = ResultKey::from_config(&self.config, self.run_id);
        results.save_results(&key, &self.metrics)?;
        results.save_norms(&key, &self.metrics)?;
        checkpoints.save(
            CheckpointKind::Server,
            &self.config.dataset,
            &self.config.similarity.to_string(),
            &self.global,
        )?;
        Ok(())
    }

    /// Whether the train-loss series records the gap to the optimum.
    pub fn records_loss_gap(&self) -> bool {
        self.config.privacy.is_active() || !self.config.similarity.is_homogeneous()
    }

    /// Recorded metrics.
    pub fn metrics(&self) -> &MetricsSeries {
        &self.metrics
    }

    /// All participants.
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// DP noise multiplier.
    pub fn sigma_g(&self) -> Option<f64> {
        self.sigma_g
    }

    /// Current algorithm state.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Repeat index.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Get statistics.
    pub fn stats(&self) -> &CoordinatorStats {
        &self.stats
    }
}

fn ratio(correct: usize, samples: usize) -> f64 {
    if samples == 0 {
        0.0
    } else {
        correct as f64 / samples as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, PrivacyMode, Similarity};
    use crate::core::Error;
    use crate::data::synthetic::{generate, SyntheticConfig};
    use crate::model::MclrLogistic;

    fn partitions(num_users: usize) -> Vec<UserPartition> {
        generate(&SyntheticConfig {
            num_users,
            samples_per_user: 20,
            dim_input: 5,
            dim_output: 3,
            alpha: 0.5,
            beta: 0.5,
            ..Default::default()
        })
        .unwrap()
    }

    fn config(nb_users: usize) -> SimulationConfig {
        SimulationConfig {
            dim_input: 5,
            dim_output: 3,
            nb_users,
            user_ratio: 0.5,
            sample_ratio: 0.2,
            local_updates: 4,
            learning_rate: 0.5,
            num_glob_iters: 3,
            noise_seed: Some(9),
            ..Default::default()
        }
    }

    fn coordinator(config: SimulationConfig, num_users: usize) -> Coordinator {
        let objective = Box::new(MclrLogistic::new(5, 3));
        Coordinator::new(config, 0, objective, partitions(num_users)).unwrap()
    }

    #[test]
    fn test_local_learning_rate() {
        let c = coordinator(config(6), 6);
        assert!(c.participants().iter().all(|p| (p.learning_rate - 0.125).abs() < 1e-7));
    }

    #[test]
    fn test_broadcast_copies_global() {
        let mut c = coordinator(config(6), 6);
        for v in c.global.values_mut() {
            *v = 0.75;
        }
        c.broadcast().unwrap();
        assert!(c
            .participants()
            .iter()
            .all(|p| p.local_model() == &c.global));
    }

    #[test]
    fn test_fixed_ratio_round() {
        let mut c = coordinator(config(6), 6);
        let state = c.run_round().unwrap();
        assert_eq!(state.selected.len(), 3);
        assert!(state.communication_threshold.is_none());
        assert!(state.channel_noise.is_none());
        assert_eq!(c.metrics().rounds(), 1);
        assert_eq!(c.metrics().param_norms.len(), 1);
        assert_eq!(c.round, 1);
    }

    #[test]
    fn test_aggregation_is_weighted_mean_of_selected() {
        let mut c = coordinator(config(6), 6);
        let before = c.global.clone();
        c.broadcast().unwrap();
        let selected = c.select();
        let norms = c.local_train(&selected).unwrap();

        let mut expected = before.clone();
        let total: usize = selected.iter().map(|&i| c.participants()[i].sample_count()).sum();
        for &i in &selected {
            let p = &c.participants()[i];
            expected
                .add_scaled(p.delta(), p.sample_count() as f32 / total as f32)
                .unwrap();
        }

        let state = c.aggregate(selected, &norms).unwrap();
        assert!(c.global.difference(&expected).unwrap().norm() < 1e-5);
        let max = norms.iter().cloned().fold(0.0, f64::max);
        assert_eq!(state.max_delta_norm, max);
    }

    #[test]
    fn test_two_of_ten_uniform_participants_weighted_equally() {
        let uniform = generate(&SyntheticConfig {
            num_users: 10,
            samples_per_user: 100,
            dim_input: 5,
            dim_output: 3,
            ..Default::default()
        })
        .unwrap();
        assert!(uniform.iter().all(|p| p.train.len() == 100));
        let config = SimulationConfig {
            nb_users: 10,
            user_ratio: 0.2,
            ..config(10)
        };
        let mut c = Coordinator::new(config, 0, Box::new(MclrLogistic::new(5, 3)), uniform).unwrap();
        assert_eq!(c.round, 0);

        c.broadcast().unwrap();
        let selected = c.select();
        assert_eq!(selected.len(), 2);
        assert_ne!(selected[0], selected[1]);
        assert_eq!(selected, selection::select_fixed_ratio(10, 2, 0, 0));

        c.local_train(&selected).unwrap();
        for &i in &selected {
            let p = &c.participants[i];
            c.aggregator
                .submit(&p.id, p.delta().clone(), p.sample_count())
                .unwrap();
        }
        assert_eq!(c.aggregator.weights().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_unselected_participants_untouched() {
        let mut c = coordinator(config(6), 6);
        c.broadcast().unwrap();
        let selected = c.select();
        c.local_train(&selected).unwrap();
        for (i, p) in c.participants().iter().enumerate() {
            if !selected.contains(&i) {
                assert_eq!(p.delta_norm(), 0.0);
                assert_eq!(p.local_model(), &c.global);
            }
        }
    }

    #[test]
    fn test_noise_mode_round() {
        let cfg = SimulationConfig {
            noise: true,
            user_ratio: 0.25,
            ..config(40)
        };
        let mut c = coordinator(cfg, 40);
        let state = c.run_round().unwrap();
        let threshold = state.communication_threshold.unwrap();
        for &i in &state.selected {
            assert!(c.participants()[i].channel_quality.unwrap() >= threshold);
        }
        assert!(state.channel_noise.unwrap() > 0.0);
    }

    #[test]
    fn test_noise_mode_all_users_is_fatal() {
        let cfg = SimulationConfig {
            noise: true,
            user_ratio: 1.0,
            ..config(6)
        };
        let objective = Box::new(MclrLogistic::new(5, 3));
        assert!(matches!(
            Coordinator::new(cfg, 0, objective, partitions(6)),
            Err(Error::DegenerateThreshold(_))
        ));
    }

    #[test]
    fn test_seeded_runs_reproducible() {
        let cfg = SimulationConfig {
            privacy: PrivacyMode::Gaussian,
            ..config(6)
        };
        let mut a = coordinator(cfg.clone(), 6);
        let mut b = coordinator(cfg, 6);
        a.train().unwrap();
        b.train().unwrap();
        assert_eq!(a.global, b.global);
        assert!(a.sigma_g().unwrap() > 0.0);
    }

    #[test]
    fn test_scaffold_records_control_norms() {
        let cfg = SimulationConfig {
            algorithm: Algorithm::Scaffold,
            ..config(6)
        };
        let mut c = coordinator(cfg, 6);
        c.train().unwrap();
        let controls = c.metrics().control_norms.clone().unwrap();
        assert_eq!(controls.len(), 3);
        assert!(controls.iter().all(|n| *n > 0.0));
    }

    #[test]
    fn test_loss_gap_rule() {
        let iid = coordinator(
            SimulationConfig {
                similarity: Similarity::Iid,
                ..config(6)
            },
            6,
        );
        assert!(!iid.records_loss_gap());

        let level_one = coordinator(
            SimulationConfig {
                similarity: Similarity::Level(1.0),
                ..config(6)
            },
            6,
        );
        assert!(!level_one.records_loss_gap());

        let private_iid = coordinator(
            SimulationConfig {
                similarity: Similarity::Iid,
                privacy: PrivacyMode::Gaussian,
                ..config(6)
            },
            6,
        );
        assert!(private_iid.records_loss_gap());
        assert!(coordinator(config(6), 6).records_loss_gap());
    }

    #[test]
    fn test_loss_gap_at_optimum_is_zero() {
        let mut c = coordinator(config(6), 6);
        let optimum = c.global.clone();
        c = c.with_optimum(&optimum).unwrap();
        c.evaluate().unwrap();
        assert!(c.metrics().rs_train_loss[0].abs() < 1e-9);
    }

    #[test]
    fn test_evaluation_covers_all_participants() {
        let mut c = coordinator(config(6), 6);
        let snapshot = c.evaluate().unwrap();
        // Zero model on three classes.
        assert!((snapshot.test_loss - 3.0f64.ln()).abs() < 1e-5);
        assert!(snapshot.dissimilarity.value >= -1e-9);
        assert!((0.0..=1.0).contains(&snapshot.test_accuracy));
    }
}
