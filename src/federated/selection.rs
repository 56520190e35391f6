//! Participant selection policies.
//!
//! Selection returns indices into the participant collection, ascending, so
//! that local training always visits participants in collection order.

use crate::core::{RoundIndex, RunId};
use crate::federated::channel::ChannelModel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How participants are chosen each round.
#[derive(Clone, Debug)]
pub enum SelectionPolicy {
    /// Seeded uniform sampling without replacement
    FixedRatio {
        /// Participants per round; 0 means everyone
        users_per_round: usize,
    },
    /// Transmit iff the drawn channel gain clears the threshold
    ChannelThreshold(ChannelModel),
}

impl SelectionPolicy {
    /// Threshold of the channel policy, if any.
    pub fn communication_threshold(&self) -> Option<f64> {
        match self {
            SelectionPolicy::FixedRatio { .. } => None,
            SelectionPolicy::ChannelThreshold(channel) => Some(channel.threshold),
        }
    }
}

/// Seed of the fixed-ratio generator for a round of a run.
pub fn round_seed(round: RoundIndex, run_id: RunId) -> u64 {
    (round as u64).wrapping_mul(run_id as u64 + 1)
}

/// Sample `users_per_round` of `pool_size` participants for a round.
///
/// Deterministic in `(round, run_id, users_per_round, pool_size)`. Selects
/// everyone when `users_per_round` is zero or the pool size.
pub fn select_fixed_ratio(
    pool_size: usize,
    users_per_round: usize,
    round: RoundIndex,
    run_id: RunId,
) -> Vec<usize> {
    if users_per_round == 0 || users_per_round >= pool_size {
        return (0..pool_size).collect();
    }

    let mut rng = StdRng::seed_from_u64(round_seed(round, run_id));
    let mut selected = rand::seq::index::sample(&mut rng, pool_size, users_per_round).into_vec();
    selected.sort_unstable();
    selected
}

/// Keep the participants whose channel quality clears `threshold`.
pub fn select_by_quality(qualities: &[f64], threshold: f64) -> Vec<usize> {
    qualities
        .iter()
        .enumerate()
        .filter(|(_, quality)| **quality >= threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Draw one fresh channel quality per participant.
pub fn draw_qualities<R: Rng + ?Sized>(channel: &ChannelModel, count: usize, rng: &mut R) -> Vec<f64> {
    (0..count).map(|_| channel.draw_quality(rng)).collect()
}
