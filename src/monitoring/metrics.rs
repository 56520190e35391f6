//! Per-round convergence metrics.
//!
//! Append-only series recorded by the coordinator after each round.

use crate::core::{now, RoundIndex, Timestamp};
use crate::federated::dissimilarity::Dissimilarity;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Metrics of a single evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round index
    pub round: RoundIndex,
    /// Sample-weighted test accuracy
    pub test_accuracy: f64,
    /// Mean participant test loss
    pub test_loss: f64,
    /// Sample-weighted train accuracy
    pub train_accuracy: f64,
    /// Mean participant train loss
    pub train_loss: f64,
    /// Mean participant loss gap to the reference optimum
    pub train_loss_gap: f64,
    /// Gradient dissimilarity over all participants
    pub dissimilarity: Dissimilarity,
    /// Evaluation time
    pub timestamp: Timestamp,
}

impl RoundSnapshot {
    /// Log the snapshot at info level.
    pub fn log(&self) {
        info!(
            round = self.round,
            test_accuracy = self.test_accuracy,
            test_loss = self.test_loss,
            train_accuracy = self.train_accuracy,
            train_loss = self.train_loss,
            train_loss_gap = self.train_loss_gap,
            dissimilarity = self.dissimilarity.value,
            mean_of_norms = self.dissimilarity.mean_of_norms,
            norm_of_mean = self.dissimilarity.norm_of_mean,
            "Round evaluated"
        );
    }
}

/// Append-only metric series of one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSeries {
    /// Test accuracy per round
    pub rs_glob_acc: Vec<f64>,
    /// Train accuracy per round
    pub rs_train_acc: Vec<f64>,
    /// Train loss or loss gap per round
    pub rs_train_loss: Vec<f64>,
    /// Test loss per round
    pub rs_test_loss: Vec<f64>,
    /// Gradient dissimilarity per round
    pub rs_train_diss: Vec<f64>,
    /// Largest participant delta norm per round
    pub param_norms: Vec<f64>,
    /// Global control norm per round (control-variate algorithms)
    pub control_norms: Option<Vec<f64>>,
}

impl MetricsSeries {
    /// Empty series; `with_controls` enables control norms.
    pub fn new(with_controls: bool) -> Self {
        Self {
            control_norms: if with_controls { Some(Vec::new()) } else { None },
            ..Default::default()
        }
    }

    /// Append an evaluation; `use_gap` records the loss gap as train loss.
    pub fn record(&mut self, snapshot: &RoundSnapshot, use_gap: bool) {
        self.rs_glob_acc.push(snapshot.test_accuracy);
        self.rs_train_acc.push(snapshot.train_accuracy);
        self.rs_train_loss.push(if use_gap {
            snapshot.train_loss_gap
        } else {
            snapshot.train_loss
        });
        self.rs_test_loss.push(snapshot.test_loss);
        self.rs_train_diss.push(snapshot.dissimilarity.value);
    }

    /// Append the largest delta norm of a round.
    pub fn record_norm(&mut self, max_delta_norm: f64) {
        self.param_norms.push(max_delta_norm);
    }

    /// Append the global control norm of a round.
    pub fn record_control_norm(&mut self, norm: f64) {
        if let Some(norms) = self.control_norms.as_mut() {
            norms.push(norm);
        }
    }

    /// Number of evaluated rounds.
    pub fn rounds(&self) -> usize {
        self.rs_glob_acc.len()
    }

    /// True when all five result series hold at least one value.
    pub fn is_complete(&self) -> bool {
        !self.rs_glob_acc.is_empty()
            && !self.rs_train_acc.is_empty()
            && !self.rs_train_loss.is_empty()
            && !self.rs_test_loss.is_empty()
            && !self.rs_train_diss.is_empty()
    }
}
