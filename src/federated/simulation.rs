//! Simulation driver.
//!
//! Runs the configured repeats, each with its own coordinator, then averages
//! the per-repeat results.

use crate::config::SimulationConfig;
use crate::core::{Result, RunId};
use crate::data::{DatasetReader, UserPartition};
use crate::federated::coordinator::Coordinator;
use crate::federated::optimum::find_optimum;
use crate::model::{build_objective, ModelParams};
use crate::storage::{CheckpointKind, CheckpointStore, ResultKey, ResultStore};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Outcome of a simulation.
#[derive(Clone, Debug, Default)]
pub struct SimulationReport {
    /// Repeats that finished and were persisted
    pub completed: Vec<RunId>,
    /// Repeats that failed, with their error
    pub failed: Vec<(RunId, String)>,
    /// Averaged results file, if any repeat produced results
    pub averaged: Option<PathBuf>,
}

/// Load the configured dataset and run the simulation.
pub fn simulate(config: &SimulationConfig) -> Result<SimulationReport> {
    config.validate()?;
    let partitions = DatasetReader::new(&config.data_dir).read(
        &config.dataset,
        config.number,
        &config.similarity,
    )?;
    simulate_with_partitions(config, partitions)
}

/// Run every selected repeat over already loaded partitions.
pub fn simulate_with_partitions(
    config: &SimulationConfig,
    partitions: Vec<UserPartition>,
) -> Result<SimulationReport> {
    config.validate()?;
    info!(
        algorithm = %config.algorithm,
        dataset = %config.dataset,
        similarity = %config.similarity,
        privacy = %config.privacy,
        noise = config.noise,
        users_per_round = config.users_per_round(),
        local_updates = config.local_updates,
        rounds = config.num_glob_iters,
        "Starting simulation"
    );

    let results = ResultStore::new(&config.results_dir);
    let checkpoints = CheckpointStore::new(&config.models_dir);
    let similarity = config.similarity.to_string();
    let optimum = if checkpoints.exists(CheckpointKind::Optimum, &config.dataset, &similarity) {
        Some(checkpoints.load(CheckpointKind::Optimum, &config.dataset, &similarity)?)
    } else {
        warn!(
            dataset = %config.dataset,
            similarity = %similarity,
            "No reference optimum, train loss gap equals train loss"
        );
        None
    };

    let mut report = SimulationReport::default();
    for run_id in config.repeat_range() {
        info!(run_id, "Running repeat");
        match run_repeat(config, run_id, partitions.clone(), optimum.as_ref(), &results, &checkpoints) {
            Ok(()) => report.completed.push(run_id),
            Err(e) => {
                error!(run_id, error = %e, "Repeat failed");
                report.failed.push((run_id, e.to_string()));
            }
        }
    }

    let runs: Vec<RunId> = (0..config.times).collect();
    report.averaged = results.average_runs(&ResultKey::from_config(config, 0), &runs)?;
    Ok(report)
}

fn run_repeat(
    config: &SimulationConfig,
    run_id: RunId,
    partitions: Vec<UserPartition>,
    optimum: Option<&ModelParams>,
    results: &ResultStore,
    checkpoints: &CheckpointStore,
) -> Result<()> {
    let objective = build_objective(config)?;
    let mut coordinator = Coordinator::new(config.clone(), run_id, objective, partitions)?;
    if let Some(optimum) = optimum {
        coordinator = coordinator.with_optimum(optimum)?;
    }
    coordinator.train()?;
    coordinator.finalize(results, checkpoints)
}

/// Find the centralized optimum of the configured dataset and checkpoint it.
pub fn compute_optimum(config: &SimulationConfig, partitions: &[UserPartition]) -> Result<PathBuf> {
    let objective = build_objective(config)?;
    let optimum = find_optimum(
        objective.as_ref(),
        partitions,
        config.optimum_iters,
        config.learning_rate,
    )?;
    CheckpointStore::new(&config.models_dir).save(
        CheckpointKind::Optimum,
        &config.dataset,
        &config.similarity.to_string(),
        &optimum,
    )
}
