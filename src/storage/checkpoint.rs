//! Model checkpoints.
//!
//! bincode-encoded parameters under `<models>/<dataset>/`.

use crate::core::{Error, Result};
use crate::model::ModelParams;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Which model a checkpoint holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Final global model of a run
    Server,
    /// Centralized reference optimum
    Optimum,
}

impl CheckpointKind {
    fn prefix(&self) -> &'static str {
        match self {
            CheckpointKind::Server => "server",
            CheckpointKind::Optimum => "optimum",
        }
    }
}

/// Checkpoint directory.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path of a checkpoint.
    pub fn path(&self, kind: CheckpointKind, dataset: &str, similarity: &str) -> PathBuf {
        self.root
            .join(dataset)
            .join(format!("{}_{}.bin", kind.prefix(), similarity))
    }

    /// Whether the checkpoint exists.
    pub fn exists(&self, kind: CheckpointKind, dataset: &str, similarity: &str) -> bool {
        self.path(kind, dataset, similarity).exists()
    }

    /// Encode and write `params`.
    pub fn save(
        &self,
        kind: CheckpointKind,
        dataset: &str,
        similarity: &str,
        params: &ModelParams,
    ) -> Result<PathBuf> {
        let path = self.path(kind, dataset, similarity);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bincode::serialize(params)?)?;
        info!(path = %path.display(), params = params.param_count(), "Checkpoint saved");
        Ok(path)
    }

    /// Read and decode a checkpoint.
    pub fn load(&self, kind: CheckpointKind, dataset: &str, similarity: &str) -> Result<ModelParams> {
        let path = self.path(kind, dataset, similarity);
        if !path.exists() {
            return Err(Error::CheckpointNotFound(path.display().to_string()));
        }
        Ok(bincode::deserialize(&fs::read(&path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamTensor;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let params = ModelParams::new(vec![
            ParamTensor::from_values(&[2, 2], vec![1.0, -2.0, 3.5, 0.0]).unwrap(),
            ParamTensor::from_values(&[2], vec![0.25, 4.0]).unwrap(),
        ]);

        let path = store.save(CheckpointKind::Server, "Logistic", "iid", &params).unwrap();
        assert!(path.ends_with("Logistic/server_iid.bin"));
        assert!(store.exists(CheckpointKind::Server, "Logistic", "iid"));
        assert!(!store.exists(CheckpointKind::Optimum, "Logistic", "iid"));

        let loaded = store.load(CheckpointKind::Server, "Logistic", "iid").unwrap();
        assert_eq!(loaded, params);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(matches!(
            store.load(CheckpointKind::Optimum, "Logistic", "0.5"),
            Err(Error::CheckpointNotFound(_))
        ));
    }
}
