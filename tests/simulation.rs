//! End-to-end simulations on small synthetic populations.

use fedsim::config::{Algorithm, PrivacyMode, SimulationConfig, Similarity};
use fedsim::data::{generate, write_partitions, SyntheticConfig, UserPartition};
use fedsim::federated::{compute_optimum, simulate, simulate_with_partitions};
use fedsim::storage::{CheckpointKind, CheckpointStore, ResultKey, ResultStore};
use tempfile::{tempdir, TempDir};

fn config(dir: &TempDir) -> SimulationConfig {
    SimulationConfig {
        dim_input: 5,
        dim_output: 3,
        nb_users: 10,
        nb_samples: 20,
        user_ratio: 0.3,
        sample_ratio: 0.2,
        local_updates: 5,
        learning_rate: 0.5,
        num_glob_iters: 4,
        times: 2,
        noise_seed: Some(17),
        optimum_iters: 50,
        data_dir: dir.path().join("data"),
        results_dir: dir.path().join("results"),
        models_dir: dir.path().join("models"),
        ..Default::default()
    }
}

fn partitions(config: &SimulationConfig) -> Vec<UserPartition> {
    generate(&SyntheticConfig::from_simulation(config, 3)).unwrap()
}

#[test]
fn test_fedavg_end_to_end() {
    let dir = tempdir().unwrap();
    let config = config(&dir);
    let report = simulate_with_partitions(&config, partitions(&config)).unwrap();

    assert_eq!(report.completed, vec![0, 1]);
    assert!(report.failed.is_empty());
    assert!(report.averaged.is_some());

    let store = ResultStore::new(&config.results_dir);
    let key = ResultKey::from_config(&config, 0);
    for run in 0..2 {
        let results = store.load_results(&key.for_run(run)).unwrap();
        assert_eq!(results.rs_glob_acc.len(), 4);
        assert_eq!(results.rs_train_diss.len(), 4);
        assert!(results.rs_glob_acc.iter().all(|a| (0.0..=1.0).contains(a)));
        assert!(results.rs_train_diss.iter().all(|d| *d >= -1e-9));
    }
    let norms = store.load_norms(&key).unwrap();
    assert_eq!(norms.rs_param_norms.len(), 4);
    assert!(norms.rs_control_norms.is_none());

    let averaged = store.load_results(&key.averaged()).unwrap();
    assert_eq!(averaged.rs_test_loss.len(), 4);

    assert!(CheckpointStore::new(&config.models_dir).exists(
        CheckpointKind::Server,
        &config.dataset,
        &config.similarity.to_string()
    ));
}

#[test]
fn test_single_repeat_selection() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig {
        times: 3,
        time: Some(1),
        ..config(&dir)
    };
    let report = simulate_with_partitions(&config, partitions(&config)).unwrap();
    assert_eq!(report.completed, vec![1]);

    let store = ResultStore::new(&config.results_dir);
    let key = ResultKey::from_config(&config, 1);
    assert!(store.results_path(&key).exists());
    assert!(!store.results_path(&key.for_run(0)).exists());
}

#[test]
fn test_scaffold_with_optimum() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig {
        algorithm: Algorithm::ScaffoldWarm,
        times: 1,
        ..config(&dir)
    };
    let data = partitions(&config);
    let path = compute_optimum(&config, &data).unwrap();
    assert!(path.exists());

    let report = simulate_with_partitions(&config, data).unwrap();
    assert_eq!(report.completed, vec![0]);

    let store = ResultStore::new(&config.results_dir);
    let key = ResultKey::from_config(&config, 0);
    let norms = store.load_norms(&key).unwrap();
    assert_eq!(norms.rs_control_norms.map(|c| c.len()), Some(4));
    assert!(store
        .norms_path(&key)
        .to_string_lossy()
        .contains("SCAFFOLD-warm_norms"));
}

#[test]
fn test_channel_noise_end_to_end() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig {
        noise: true,
        nb_users: 40,
        user_ratio: 0.25,
        times: 1,
        ..config(&dir)
    };
    let report = simulate_with_partitions(&config, partitions(&config)).unwrap();
    assert_eq!(report.completed, vec![0]);

    let key = ResultKey::from_config(&config, 0);
    assert!(key.file_name(false).contains("_noisy_"));
    let results = ResultStore::new(&config.results_dir).load_results(&key).unwrap();
    assert_eq!(results.rs_glob_acc.len(), 4);
}

#[test]
fn test_gaussian_privacy_end_to_end() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig {
        privacy: PrivacyMode::Gaussian,
        epsilon_target: 4.0,
        times: 1,
        ..config(&dir)
    };
    let report = simulate_with_partitions(&config, partitions(&config)).unwrap();
    assert_eq!(report.completed, vec![0]);

    let key = ResultKey::from_config(&config, 0);
    assert!(key.file_name(false).contains("_4.0Gaussian_"));
    assert!(ResultStore::new(&config.results_dir).load_results(&key).is_ok());
}

#[test]
fn test_reads_dataset_from_disk() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig {
        times: 1,
        similarity: Similarity::Pair { alpha: 0.5, beta: 0.5 },
        ..config(&dir)
    };
    write_partitions(
        &config.data_dir,
        &config.dataset,
        config.number,
        &config.similarity,
        &partitions(&config),
    )
    .unwrap();

    let report = simulate(&config).unwrap();
    assert_eq!(report.completed, vec![0]);
}

#[test]
fn test_missing_dataset_is_fatal() {
    let dir = tempdir().unwrap();
    assert!(simulate(&config(&dir)).is_err());
}

#[test]
fn test_homogeneous_training_reduces_loss() {
    let dir = tempdir().unwrap();
    let config = SimulationConfig {
        similarity: Similarity::Iid,
        user_ratio: 1.0,
        num_glob_iters: 10,
        times: 1,
        ..config(&dir)
    };
    simulate_with_partitions(&config, partitions(&config)).unwrap();

    let results = ResultStore::new(&config.results_dir)
        .load_results(&ResultKey::from_config(&config, 0))
        .unwrap();
    let first = results.rs_train_loss[0];
    let last = results.rs_train_loss[results.rs_train_loss.len() - 1];
    assert!(last < first);
}
