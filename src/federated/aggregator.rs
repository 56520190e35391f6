//! Delta aggregation for federated rounds.
//!
//! Sample-weighted averaging of participant deltas (FedAvg weighting).

use crate::core::{Error, Result, RoundIndex};
use crate::model::ModelParams;

/// Delta submitted by a participant.
#[derive(Clone, Debug)]
pub struct ParticipantDelta {
    /// Participant ID
    pub participant_id: String,
    /// Local model minus received global model
    pub delta: ModelParams,
    /// Training samples backing the delta
    pub sample_count: usize,
}

/// Collects the deltas of one round and folds them into the global model.
pub struct DeltaAggregator {
    /// Server-side learning rate
    pub global_lr: f32,
    /// Submissions in selection order
    submissions: Vec<ParticipantDelta>,
    /// Current aggregation round
    round: RoundIndex,
}

impl DeltaAggregator {
    /// Create a new aggregator.
    pub fn new(global_lr: f32) -> Self {
        Self {
            global_lr,
            submissions: Vec::new(),
            round: 0,
        }
    }

    /// Submit the delta of a selected participant.
    pub fn submit(&mut self, participant_id: &str, delta: ModelParams, sample_count: usize) -> Result<()> {
        if let Some(first) = self.submissions.first() {
            first.delta.check_compatible(&delta)?;
        }
        self.submissions.push(ParticipantDelta {
            participant_id: participant_id.to_string(),
            delta,
            sample_count,
        });
        Ok(())
    }

    /// Normalized weights `n_i / sum n_j` in submission order.
    pub fn weights(&self) -> Result<Vec<f64>> {
        let counts: Vec<usize> = self.submissions.iter().map(|s| s.sample_count).collect();
        aggregation_weights(&counts, self.round)
    }

    /// Weighted average of the submitted deltas.
    pub fn aggregate(&self) -> Result<ModelParams> {
        let weights = self.weights()?;
        let mut aggregated = self.submissions[0].delta.zeros_like();
        for (submission, weight) in self.submissions.iter().zip(weights.iter()) {
            aggregated.add_scaled(&submission.delta, *weight as f32)?;
        }
        Ok(aggregated)
    }

    /// `global += global_lr * aggregate()`; returns the aggregated delta.
    pub fn apply(&self, global: &mut ModelParams) -> Result<ModelParams> {
        let aggregated = self.aggregate()?;
        global.add_scaled(&aggregated, self.global_lr)?;
        Ok(aggregated)
    }

    /// Get participant count.
    pub fn participant_count(&self) -> usize {
        self.submissions.len()
    }

    /// IDs of the participants that submitted this round.
    pub fn participant_ids(&self) -> Vec<&str> {
        self.submissions
            .iter()
            .map(|s| s.participant_id.as_str())
            .collect()
    }

    /// Clear all submissions and advance round.
    pub fn next_round(&mut self) {
        self.submissions.clear();
        self.round += 1;
    }

    /// Get current round.
    pub fn current_round(&self) -> RoundIndex {
        self.round
    }
}

impl Default for DeltaAggregator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Normalized sample-count weights.
///
/// Fails with `ZeroSampleWeight` when the counts are empty or sum to zero.
pub fn aggregation_weights(sample_counts: &[usize], round: RoundIndex) -> Result<Vec<f64>> {
    let total: usize = sample_counts.iter().sum();
    if total == 0 {
        return Err(Error::ZeroSampleWeight(round));
    }
    Ok(sample_counts
        .iter()
        .map(|n| *n as f64 / total as f64)
        .collect())
}
