//! fedsim command line
//!
//! Runs federated simulations from a JSON configuration, with flags
//! overriding individual fields.
//!
//! # Usage
//!
//! ```bash
//! fedsim -c config/logistic.json --algorithm SCAFFOLD --times 5
//! fedsim --synthetic --alpha 0.5 --beta 0.5 --find-optimum
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use fedsim::config::{Algorithm, PrivacyMode, SimulationConfig, Similarity};
use fedsim::data::{generate, write_partitions, DatasetReader, SyntheticConfig, UserPartition};
use fedsim::federated::{compute_optimum, simulate_with_partitions};
use fedsim::monitoring::{self, LogFormat, LogLevel, LoggerConfig};

/// fedsim - Federated Learning Simulator
#[derive(Parser, Debug)]
#[command(name = "fedsim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Dataset name
    #[arg(long)]
    dataset: Option<String>,

    /// FedAvg, FedSGD, SCAFFOLD or SCAFFOLD-warm
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// Model architecture tag
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    dim_input: Option<usize>,

    #[arg(long)]
    dim_output: Option<usize>,

    /// Configured participant population
    #[arg(long)]
    nb_users: Option<usize>,

    /// Configured samples per participant
    #[arg(long)]
    nb_samples: Option<usize>,

    #[arg(long)]
    sample_ratio: Option<f64>,

    #[arg(long)]
    user_ratio: Option<f64>,

    /// L2 regularization strength
    #[arg(long)]
    weight_decay: Option<f32>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// Per-sample clipping bound
    #[arg(long)]
    max_norm: Option<f32>,

    #[arg(long)]
    local_updates: Option<usize>,

    /// Communication rounds
    #[arg(long)]
    num_glob_iters: Option<usize>,

    /// Similarity preset level
    #[arg(long)]
    similarity: Option<f64>,

    /// Model heterogeneity (both alpha and beta negative means iid)
    #[arg(long, allow_hyphen_values = true)]
    alpha: Option<f64>,

    /// Feature heterogeneity
    #[arg(long, allow_hyphen_values = true)]
    beta: Option<f64>,

    /// Wireless channel noise with threshold selection
    #[arg(long)]
    noise: bool,

    #[arg(long)]
    power_control: Option<f64>,

    /// Receiver noise standard deviation
    #[arg(long)]
    channel_sigma: Option<f64>,

    /// None or Gaussian
    #[arg(long = "dp")]
    privacy: Option<PrivacyMode>,

    #[arg(long)]
    epsilon: Option<f64>,

    /// Independent repeats
    #[arg(long)]
    times: Option<usize>,

    /// Run only this repeat
    #[arg(long)]
    time: Option<usize>,

    /// Dataset variant number
    #[arg(long)]
    number: Option<usize>,

    /// Seed for channel draws and noise
    #[arg(long)]
    noise_seed: Option<u64>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    results_dir: Option<PathBuf>,

    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Generate a synthetic dataset instead of reading one
    #[arg(long)]
    synthetic: bool,

    /// Seed of the synthetic generator
    #[arg(long, default_value_t = 1)]
    synthetic_seed: u64,

    /// Write the synthetic dataset under the data directory
    #[arg(long, requires = "synthetic")]
    write_data: bool,

    /// Compute and checkpoint the reference optimum before training
    #[arg(long)]
    find_optimum: bool,

    /// Only compute the reference optimum
    #[arg(long)]
    optimum_only: bool,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Emit JSON log lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// Load the configuration file (or defaults) and apply flag overrides.
    fn build_config(&self) -> Result<SimulationConfig> {
        let mut config = match &self.config_file {
            Some(path) => SimulationConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => SimulationConfig::default(),
        };

        macro_rules! override_field {
            ($($flag:ident => $field:ident),* $(,)?) => {
                $(if let Some(value) = self.$flag.clone() {
                    config.$field = value;
                })*
            };
        }
        override_field!(
            dataset => dataset,
            algorithm => algorithm,
            model => model,
            dim_input => dim_input,
            dim_output => dim_output,
            nb_users => nb_users,
            nb_samples => nb_samples,
            sample_ratio => sample_ratio,
            user_ratio => user_ratio,
            weight_decay => weight_decay,
            learning_rate => learning_rate,
            max_norm => max_norm,
            local_updates => local_updates,
            num_glob_iters => num_glob_iters,
            privacy => privacy,
            epsilon => epsilon_target,
            times => times,
            number => number,
            data_dir => data_dir,
            results_dir => results_dir,
            models_dir => models_dir,
        );

        if self.similarity.is_some() || self.alpha.is_some() || self.beta.is_some() {
            config.similarity = Similarity::resolve(
                self.similarity,
                self.alpha.unwrap_or(0.0),
                self.beta.unwrap_or(0.0),
            );
        }
        if self.noise {
            config.noise = true;
        }
        if let Some(power_control) = self.power_control {
            config.channel.power_control = power_control;
        }
        if let Some(sigma) = self.channel_sigma {
            config.channel.sigma = sigma;
        }
        if self.time.is_some() {
            config.time = self.time;
        }
        if self.noise_seed.is_some() {
            config.noise_seed = self.noise_seed;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let logger = LoggerConfig {
        level: args.log_level,
        format: if args.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        ..Default::default()
    };
    if let Err(e) = monitoring::init(&logger) {
        eprintln!("fedsim: {}", e);
    }

    match run(args) {
        Ok(()) => {
            info!("Simulation finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = args.build_config()?;
    let partitions = load_partitions(&args, &config)?;

    if args.find_optimum || args.optimum_only {
        let path = compute_optimum(&config, &partitions).context("Failed to find the optimum")?;
        info!(path = %path.display(), "Reference optimum saved");
        if args.optimum_only {
            return Ok(());
        }
    }

    let report = simulate_with_partitions(&config, partitions).context("Simulation failed")?;
    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "Some repeats failed");
    }
    if let Some(path) = &report.averaged {
        info!(path = %path.display(), "Averaged results written");
    }
    if report.completed.is_empty() {
        anyhow::bail!("no repeat completed");
    }
    Ok(())
}

fn load_partitions(args: &Args, config: &SimulationConfig) -> Result<Vec<UserPartition>> {
    if !args.synthetic {
        return DatasetReader::new(&config.data_dir)
            .read(&config.dataset, config.number, &config.similarity)
            .with_context(|| format!("Failed to read dataset {}", config.dataset));
    }

    let partitions = generate(&SyntheticConfig::from_simulation(config, args.synthetic_seed))
        .context("Failed to generate synthetic data")?;
    info!(users = partitions.len(), "Synthetic dataset generated");
    if args.write_data {
        write_partitions(
            &config.data_dir,
            &config.dataset,
            config.number,
            &config.similarity,
            &partitions,
        )
        .context("Failed to write synthetic data")?;
    }
    Ok(partitions)
}
