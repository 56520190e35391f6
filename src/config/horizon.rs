//! Protocol-horizon lookup used by the privacy accountant.
//!
//! The horizon `T` is the total number of communication rounds the privacy
//! budget is spread over. It is keyed by dataset name and local update count
//! and falls back to a default for unknown pairs.

use serde::{Deserialize, Serialize};

/// Horizon used when no entry matches.
pub const DEFAULT_HORIZON: usize = 400;

/// A single `(dataset, local_updates) -> T` mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizonEntry {
    /// Dataset name
    pub dataset: String,
    /// Number of local updates per round
    pub local_updates: usize,
    /// Horizon in rounds
    pub horizon: usize,
}

impl HorizonEntry {
    /// Create a new entry.
    pub fn new(dataset: &str, local_updates: usize, horizon: usize) -> Self {
        Self {
            dataset: dataset.to_string(),
            local_updates,
            horizon,
        }
    }
}

/// Lookup table for the protocol horizon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonTable {
    /// Known mappings, first match wins
    pub entries: Vec<HorizonEntry>,
    /// Fallback horizon
    pub default_horizon: usize,
}

impl HorizonTable {
    /// Create an empty table with the given fallback.
    pub fn empty(default_horizon: usize) -> Self {
        Self {
            entries: Vec::new(),
            default_horizon,
        }
    }

    /// Add or override an entry.
    pub fn with_entry(mut self, dataset: &str, local_updates: usize, horizon: usize) -> Self {
        self.entries
            .retain(|e| !(e.dataset == dataset && e.local_updates == local_updates));
        self.entries
            .push(HorizonEntry::new(dataset, local_updates, horizon));
        self
    }

    /// Look up the horizon for a dataset and local update count.
    pub fn lookup(&self, dataset: &str, local_updates: usize) -> usize {
        self.entries
            .iter()
            .find(|e| e.dataset == dataset && e.local_updates == local_updates)
            .map(|e| e.horizon)
            .unwrap_or(self.default_horizon)
    }
}

impl Default for HorizonTable {
    fn default() -> Self {
        Self::empty(DEFAULT_HORIZON)
            .with_entry("Logistic", 50, 1500)
            .with_entry("Logistic", 100, 800)
            .with_entry("Logistic", 200, 400)
            .with_entry("Femnist", 50, 800)
            .with_entry("Femnist", 100, 400)
    }
}
