//! Per-participant data partitions.

use crate::core::{Error, Result, Sample};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Train and test shard of one participant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserPartition {
    /// Participant ID
    pub id: String,
    /// Private training shard
    pub train: Vec<Sample>,
    /// Held-out test shard
    pub test: Vec<Sample>,
}

impl UserPartition {
    /// Create a new partition.
    pub fn new(id: &str, train: Vec<Sample>, test: Vec<Sample>) -> Self {
        Self {
            id: id.to_string(),
            train,
            test,
        }
    }
}

/// Check the invariants the coordinator relies on.
///
/// The pool must be non-empty, IDs unique, every train shard non-empty and
/// every feature vector of width `dim_input` with labels below `dim_output`.
pub fn validate_partitions(
    partitions: &[UserPartition],
    dim_input: usize,
    dim_output: usize,
) -> Result<()> {
    if partitions.is_empty() {
        return Err(Error::EmptyPool);
    }

    let mut seen = HashSet::new();
    for partition in partitions {
        if !seen.insert(partition.id.as_str()) {
            return Err(Error::MalformedDataset(format!(
                "duplicate participant id {}",
                partition.id
            )));
        }
        if partition.train.is_empty() {
            return Err(Error::MalformedDataset(format!(
                "participant {} has no training samples",
                partition.id
            )));
        }
        for sample in partition.train.iter().chain(partition.test.iter()) {
            if sample.features.len() != dim_input {
                return Err(Error::MalformedDataset(format!(
                    "participant {} has a sample of width {}, expected {}",
                    partition.id,
                    sample.features.len(),
                    dim_input
                )));
            }
            if sample.label >= dim_output {
                return Err(Error::MalformedDataset(format!(
                    "participant {} has label {} outside {} classes",
                    partition.id, sample.label, dim_output
                )));
            }
        }
    }

    Ok(())
}
