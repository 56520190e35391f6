//! Monitoring Module
//!
//! Observability for simulation runs:
//! - Structured logging through `tracing`
//! - Per-round convergence metrics

pub mod logging;
pub mod metrics;

pub use logging::{init, LogFormat, LogLevel, LoggerConfig};
pub use metrics::{MetricsSeries, RoundSnapshot};
