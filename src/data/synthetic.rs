//! Synthetic non-IID logistic partitions.
//!
//! Each participant k draws a model `W_k ~ N(u_k, 1)` with `u_k ~ N(0, alpha)`
//! and a feature mean `v_k ~ N(B_k, 1)` with `B_k ~ N(0, beta)`; features are
//! `x ~ N(v_k, diag(j^-1.2))` and labels `argmax(W_k x + b_k)`. In iid mode all
//! participants share one model and zero-mean features.

use crate::config::{SimulationConfig, Similarity};
use crate::core::{Error, Result, Sample};
use crate::data::partition::UserPartition;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Generator settings.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Number of participants
    pub num_users: usize,
    /// Training samples per participant
    pub samples_per_user: usize,
    /// Test samples as a fraction of training samples
    pub test_fraction: f64,
    /// Feature dimension
    pub dim_input: usize,
    /// Number of classes
    pub dim_output: usize,
    /// Model heterogeneity
    pub alpha: f64,
    /// Feature heterogeneity
    pub beta: f64,
    /// Shared model and features across participants
    pub iid: bool,
    /// Generator seed
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            num_users: 100,
            samples_per_user: 200,
            test_fraction: 0.25,
            dim_input: 40,
            dim_output: 10,
            alpha: 0.0,
            beta: 0.0,
            iid: false,
            seed: 1,
        }
    }
}

impl SyntheticConfig {
    /// Generator matching the population and dimensions of a run.
    ///
    /// A similarity level `s` below 1 maps to `alpha = beta = 1 - s`.
    pub fn from_simulation(config: &SimulationConfig, seed: u64) -> Self {
        let (alpha, beta, iid) = match config.similarity {
            Similarity::Iid => (0.0, 0.0, true),
            Similarity::Level(level) if level >= 1.0 => (0.0, 0.0, true),
            Similarity::Level(level) => (1.0 - level, 1.0 - level, false),
            Similarity::Pair { alpha, beta } => (alpha, beta, false),
        };
        Self {
            num_users: config.nb_users,
            samples_per_user: config.nb_samples,
            dim_input: config.dim_input,
            dim_output: config.dim_output,
            alpha,
            beta,
            iid,
            seed,
            ..Default::default()
        }
    }
}

struct LocalDistribution {
    weights: Vec<f64>,
    bias: Vec<f64>,
    mean: Vec<f64>,
}

/// Generate partitions for every participant.
pub fn generate(config: &SyntheticConfig) -> Result<Vec<UserPartition>> {
    if config.num_users == 0 || config.samples_per_user == 0 {
        return Err(Error::InvalidConfig(
            "synthetic data needs participants and samples".to_string(),
        ));
    }
    if config.dim_input == 0 || config.dim_output < 2 {
        return Err(Error::InvalidConfig(
            "synthetic data needs at least one feature and two classes".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let standard = Normal::new(0.0, 1.0)?;
    let model_center = Normal::new(0.0, config.alpha.max(0.0).sqrt())?;
    let feature_center = Normal::new(0.0, config.beta.max(0.0).sqrt())?;
    let feature_std: Vec<f64> = (1..=config.dim_input)
        .map(|j| (j as f64).powf(-1.2).sqrt())
        .collect();

    let shared = if config.iid {
        Some(LocalDistribution {
            weights: draw(&mut rng, &standard, 0.0, config.dim_output * config.dim_input),
            bias: draw(&mut rng, &standard, 0.0, config.dim_output),
            mean: vec![0.0; config.dim_input],
        })
    } else {
        None
    };

    let test_samples = ((config.samples_per_user as f64 * config.test_fraction).ceil() as usize).max(1);
    let mut partitions = Vec::with_capacity(config.num_users);

    for k in 0..config.num_users {
        let local = match &shared {
            Some(shared) => LocalDistribution {
                weights: shared.weights.clone(),
                bias: shared.bias.clone(),
                mean: shared.mean.clone(),
            },
            None => {
                let u = model_center.sample(&mut rng);
                let b = feature_center.sample(&mut rng);
                LocalDistribution {
                    weights: draw(&mut rng, &standard, u, config.dim_output * config.dim_input),
                    bias: draw(&mut rng, &standard, u, config.dim_output),
                    mean: draw(&mut rng, &standard, b, config.dim_input),
                }
            }
        };

        let mut samples = (0..config.samples_per_user + test_samples)
            .map(|_| sample_one(&mut rng, &standard, &local, &feature_std, config))
            .collect::<Vec<_>>();
        let test = samples.split_off(config.samples_per_user);

        partitions.push(UserPartition::new(&format!("f_{:05}", k), samples, test));
    }

    Ok(partitions)
}

fn draw<R: Rng>(rng: &mut R, standard: &Normal<f64>, center: f64, len: usize) -> Vec<f64> {
    (0..len).map(|_| center + standard.sample(rng)).collect()
}

fn sample_one<R: Rng>(
    rng: &mut R,
    standard: &Normal<f64>,
    local: &LocalDistribution,
    feature_std: &[f64],
    config: &SyntheticConfig,
) -> Sample {
    let features: Vec<f64> = local
        .mean
        .iter()
        .zip(feature_std.iter())
        .map(|(m, s)| m + s * standard.sample(rng))
        .collect();

    let label = (0..config.dim_output)
        .map(|c| {
            let row = &local.weights[c * config.dim_input..(c + 1) * config.dim_input];
            row.iter().zip(features.iter()).map(|(w, x)| w * x).sum::<f64>() + local.bias[c]
        })
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_z), (c, z)| {
            if z > best_z {
                (c, z)
            } else {
                (best, best_z)
            }
        })
        .0;

    Sample::new(features.into_iter().map(|x| x as f32).collect(), label)
}
