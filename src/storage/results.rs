//! Persisted metric series.
//!
//! One JSON results file and one norms file per repeat, keyed by the run
//! configuration, plus an `_avg` file averaging the repeats.

use crate::config::{Algorithm, PrivacyMode, SimulationConfig};
use crate::core::{now, Error, Result, RunId, Timestamp};
use crate::monitoring::MetricsSeries;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Identifies the results of one repeat (or their average).
#[derive(Clone, Debug, PartialEq)]
pub struct ResultKey {
    /// Dataset name
    pub dataset: String,
    /// Dataset generation number
    pub number: usize,
    /// Algorithm
    pub algorithm: Algorithm,
    /// Similarity as written in file names
    pub similarity: String,
    /// `int(local_updates * sample_ratio)`
    pub effective_updates: usize,
    /// Epsilon and mechanism when privacy is on
    pub privacy: Option<(f64, PrivacyMode)>,
    /// Channel noise enabled
    pub noisy: bool,
    /// Repeat index, or `avg`
    pub run: String,
}

impl ResultKey {
    /// Key of repeat `run_id` of `config`.
    pub fn from_config(config: &SimulationConfig, run_id: RunId) -> Self {
        Self {
            dataset: config.dataset.clone(),
            number: config.number,
            algorithm: config.algorithm,
            similarity: config.similarity.to_string(),
            effective_updates: (config.local_updates as f64 * config.sample_ratio) as usize,
            privacy: if config.privacy.is_active() {
                Some((config.epsilon_target, config.privacy))
            } else {
                None
            },
            noisy: config.noise,
            run: run_id.to_string(),
        }
    }

    /// Key of the averaged results.
    pub fn averaged(&self) -> Self {
        Self {
            run: "avg".to_string(),
            ..self.clone()
        }
    }

    /// Same key for another repeat.
    pub fn for_run(&self, run_id: RunId) -> Self {
        Self {
            run: run_id.to_string(),
            ..self.clone()
        }
    }

    /// File name without directory; `norms` selects the norms file.
    pub fn file_name(&self, norms: bool) -> String {
        let mut name = format!("{}_{}_{}", self.dataset, self.number, self.algorithm);
        if norms {
            name.push_str("_norms");
        }
        name.push_str(&format!("_{}s_{}K", self.similarity, self.effective_updates));
        if let Some((epsilon, mode)) = &self.privacy {
            name.push_str(&format!("_{:?}{}", epsilon, mode));
        }
        if self.noisy {
            name.push_str("_noisy");
        }
        name.push_str(&format!("_{}.json", self.run));
        name
    }
}

/// Contents of a results file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultsFile {
    pub rs_glob_acc: Vec<f64>,
    pub rs_train_acc: Vec<f64>,
    pub rs_train_loss: Vec<f64>,
    pub rs_test_loss: Vec<f64>,
    pub rs_train_diss: Vec<f64>,
    /// Write time
    pub created_at: Timestamp,
}

impl ResultsFile {
    fn series(&self) -> [(&'static str, &[f64]); 5] {
        [
            ("rs_glob_acc", self.rs_glob_acc.as_slice()),
            ("rs_train_acc", self.rs_train_acc.as_slice()),
            ("rs_train_loss", self.rs_train_loss.as_slice()),
            ("rs_test_loss", self.rs_test_loss.as_slice()),
            ("rs_train_diss", self.rs_train_diss.as_slice()),
        ]
    }

    fn from_series(series: &MetricsSeries) -> Self {
        Self {
            rs_glob_acc: series.rs_glob_acc.clone(),
            rs_train_acc: series.rs_train_acc.clone(),
            rs_train_loss: series.rs_train_loss.clone(),
            rs_test_loss: series.rs_test_loss.clone(),
            rs_train_diss: series.rs_train_diss.clone(),
            created_at: now(),
        }
    }
}

/// Contents of a norms file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormsFile {
    pub rs_param_norms: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rs_control_norms: Option<Vec<f64>>,
    /// Write time
    pub created_at: Timestamp,
}

/// Results directory.
#[derive(Clone, Debug)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Store rooted at `dir`; created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the results file of `key`.
    pub fn results_path(&self, key: &ResultKey) -> PathBuf {
        self.dir.join(key.file_name(false))
    }

    /// Path of the norms file of `key`.
    pub fn norms_path(&self, key: &ResultKey) -> PathBuf {
        self.dir.join(key.file_name(true))
    }

    /// Write the five result series; skipped unless all are non-empty.
    pub fn save_results(&self, key: &ResultKey, series: &MetricsSeries) -> Result<Option<PathBuf>> {
        if !series.is_complete() {
            debug!(run = %key.run, "Empty metric series, results not written");
            return Ok(None);
        }
        let file = ResultsFile::from_series(series);
        for (name, values) in file.series() {
            ensure_finite(name, values)?;
        }
        let path = self.results_path(key);
        self.write_json(&path, &file)?;
        info!(path = %path.display(), rounds = series.rounds(), "Results saved");
        Ok(Some(path))
    }

    /// Write the norm series; skipped when no round was aggregated.
    pub fn save_norms(&self, key: &ResultKey, series: &MetricsSeries) -> Result<Option<PathBuf>> {
        if series.param_norms.is_empty() {
            return Ok(None);
        }
        ensure_finite("rs_param_norms", &series.param_norms)?;
        if let Some(controls) = &series.control_norms {
            ensure_finite("rs_control_norms", controls)?;
        }
        let path = self.norms_path(key);
        let file = NormsFile {
            rs_param_norms: series.param_norms.clone(),
            rs_control_norms: if key.algorithm.uses_control_variates() {
                series.control_norms.clone()
            } else {
                None
            },
            created_at: now(),
        };
        self.write_json(&path, &file)?;
        Ok(Some(path))
    }

    /// Read a results file.
    pub fn load_results(&self, key: &ResultKey) -> Result<ResultsFile> {
        read_json(&self.results_path(key))
    }

    /// Read a norms file.
    pub fn load_norms(&self, key: &ResultKey) -> Result<NormsFile> {
        read_json(&self.norms_path(key))
    }

    /// Average the results and norms of `runs` element-wise into `_avg` files.
    ///
    /// Missing repeats are skipped; series are truncated to the shortest run.
    /// Returns `None` when no repeat has results.
    pub fn average_runs(&self, key: &ResultKey, runs: &[RunId]) -> Result<Option<PathBuf>> {
        let results: Vec<ResultsFile> = runs
            .iter()
            .filter_map(|run| self.load_results(&key.for_run(*run)).ok())
            .collect();
        if results.is_empty() {
            return Ok(None);
        }

        let averaged = ResultsFile {
            rs_glob_acc: average(results.iter().map(|r| r.rs_glob_acc.as_slice())),
            rs_train_acc: average(results.iter().map(|r| r.rs_train_acc.as_slice())),
            rs_train_loss: average(results.iter().map(|r| r.rs_train_loss.as_slice())),
            rs_test_loss: average(results.iter().map(|r| r.rs_test_loss.as_slice())),
            rs_train_diss: average(results.iter().map(|r| r.rs_train_diss.as_slice())),
            created_at: now(),
        };
        let avg_key = key.averaged();
        let path = self.results_path(&avg_key);
        self.write_json(&path, &averaged)?;

        let norms: Vec<NormsFile> = runs
            .iter()
            .filter_map(|run| self.load_norms(&key.for_run(*run)).ok())
            .collect();
        if !norms.is_empty() {
            let controls: Option<Vec<&[f64]>> = norms
                .iter()
                .map(|n| n.rs_control_norms.as_deref())
                .collect();
            let file = NormsFile {
                rs_param_norms: average(norms.iter().map(|n| n.rs_param_norms.as_slice())),
                rs_control_norms: controls.map(|c| average(c.into_iter())),
                created_at: now(),
            };
            self.write_json(&self.norms_path(&avg_key), &file)?;
        }

        info!(
            path = %path.display(),
            repeats = results.len(),
            "Averaged results saved"
        );
        Ok(Some(path))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(path, serde_json::to_vec_pretty(value)?)?;
        Ok(())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

/// JSON has no encoding for NaN or infinity.
fn ensure_finite(name: &str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(round) => Err(Error::NonFiniteMetric(format!("{} at round {}", name, round))),
        None => Ok(()),
    }
}

/// Element-wise mean, truncated to the shortest series.
fn average<'a>(series: impl Iterator<Item = &'a [f64]>) -> Vec<f64> {
    let series: Vec<&[f64]> = series.collect();
    let len = series.iter().map(|s| s.len()).min().unwrap_or(0);
    (0..len)
        .map(|i| series.iter().map(|s| s[i]).sum::<f64>() / series.len() as f64)
        .collect()
}
