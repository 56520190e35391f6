//! Data Module
//!
//! Participant data partitions:
//! - JSON dataset reader
//! - Synthetic heterogeneous partitions
//! - Partition invariants

pub mod partition;
pub mod reader;
pub mod synthetic;

pub use partition::{validate_partitions, UserPartition};
pub use reader::{write_partitions, DatasetReader};
pub use synthetic::{generate, SyntheticConfig};
