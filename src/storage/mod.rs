//! Storage Module
//!
//! Persistence of simulation outputs:
//! - Per-repeat and averaged metric series (JSON)
//! - Model checkpoints (bincode)

pub mod checkpoint;
pub mod results;

pub use checkpoint::{CheckpointKind, CheckpointStore};
pub use results::{NormsFile, ResultKey, ResultStore, ResultsFile};
