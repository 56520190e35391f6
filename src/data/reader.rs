//! Dataset reader for JSON partition files.
//!
//! Layout: `<root>/<dataset>/data/{train,test}/*<number>_<similarity>.json`,
//! each file holding `users` and `user_data: {id: {x, y}}`.

use crate::config::Similarity;
use crate::core::{Error, Result, Sample};
use crate::data::partition::UserPartition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raw samples of one participant as stored on disk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawUserData {
    /// Feature rows
    pub x: Vec<Vec<f32>>,
    /// Labels
    pub y: Vec<f64>,
}

/// Contents of one partition file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartitionFile {
    /// Participant IDs in this file
    #[serde(default)]
    pub users: Vec<String>,
    /// Optional grouping of participants
    #[serde(default)]
    pub hierarchies: Vec<serde_json::Value>,
    /// Samples per participant
    pub user_data: HashMap<String, RawUserData>,
}

/// Reads partitioned datasets from a directory tree.
pub struct DatasetReader {
    /// Root directory holding one folder per dataset
    root: PathBuf,
}

impl DatasetReader {
    /// Create a reader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the train or test split of a dataset.
    pub fn split_dir(&self, dataset: &str, split: &str) -> PathBuf {
        self.root.join(dataset).join("data").join(split)
    }

    /// Read all participants of `dataset` for the given variant number and similarity.
    ///
    /// Participants are returned sorted by ID.
    pub fn read(
        &self,
        dataset: &str,
        number: usize,
        similarity: &Similarity,
    ) -> Result<Vec<UserPartition>> {
        let suffix = format!("{}_{}.json", number, similarity);
        let train = Self::read_split(&self.split_dir(dataset, "train"), &suffix)?;
        let mut test = Self::read_split(&self.split_dir(dataset, "test"), &suffix)?;

        if train.is_empty() {
            return Err(Error::DatasetNotFound(format!(
                "no participants in {} for suffix {}",
                dataset, suffix
            )));
        }

        let mut partitions = Vec::with_capacity(train.len());
        for (id, raw_train) in train {
            let raw_test = test.remove(&id).ok_or_else(|| {
                Error::MalformedDataset(format!("participant {} has no test split", id))
            })?;
            partitions.push(UserPartition {
                train: Self::to_samples(&id, raw_train)?,
                test: Self::to_samples(&id, raw_test)?,
                id,
            });
        }

        if let Some(extra) = test.keys().next() {
            return Err(Error::MalformedDataset(format!(
                "participant {} has a test split but no train split",
                extra
            )));
        }

        debug!(dataset, participants = partitions.len(), "dataset loaded");
        Ok(partitions)
    }

    fn read_split(dir: &Path, suffix: &str) -> Result<BTreeMap<String, RawUserData>> {
        if !dir.is_dir() {
            return Err(Error::DatasetNotFound(dir.display().to_string()));
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(suffix))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(Error::DatasetNotFound(format!(
                "no files ending in {} under {}",
                suffix,
                dir.display()
            )));
        }

        let mut users = BTreeMap::new();
        for path in files {
            let content = std::fs::read_to_string(&path)?;
            let file: PartitionFile = serde_json::from_str(&content)?;
            users.extend(file.user_data);
        }
        Ok(users)
    }

    fn to_samples(id: &str, raw: RawUserData) -> Result<Vec<Sample>> {
        if raw.x.len() != raw.y.len() {
            return Err(Error::MalformedDataset(format!(
                "participant {} has {} rows but {} labels",
                id,
                raw.x.len(),
                raw.y.len()
            )));
        }
        raw.x
            .into_iter()
            .zip(raw.y)
            .map(|(features, label)| {
                if label < 0.0 || label.fract() != 0.0 {
                    return Err(Error::MalformedDataset(format!(
                        "participant {} has non-class label {}",
                        id, label
                    )));
                }
                Ok(Sample::new(features, label as usize))
            })
            .collect()
    }
}

/// Write partitions in the layout read by [`DatasetReader`].
pub fn write_partitions(
    root: impl AsRef<Path>,
    dataset: &str,
    number: usize,
    similarity: &Similarity,
    partitions: &[UserPartition],
) -> Result<()> {
    let reader = DatasetReader::new(root.as_ref());
    let file_name = format!("{}_{}_{}.json", dataset.to_lowercase(), number, similarity);

    for split in ["train", "test"] {
        let dir = reader.split_dir(dataset, split);
        std::fs::create_dir_all(&dir)?;
        let file = PartitionFile {
            users: partitions.iter().map(|p| p.id.clone()).collect(),
            hierarchies: Vec::new(),
            user_data: partitions
                .iter()
                .map(|p| {
                    let samples = if split == "train" { &p.train } else { &p.test };
                    (
                        p.id.clone(),
                        RawUserData {
                            x: samples.iter().map(|s| s.features.clone()).collect(),
                            y: samples.iter().map(|s| s.label as f64).collect(),
                        },
                    )
                })
                .collect(),
        };
        std::fs::write(dir.join(&file_name), serde_json::to_vec(&file)?)?;
    }

    Ok(())
}
