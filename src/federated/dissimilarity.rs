//! Gradient dissimilarity across participants.
//!
//! `mean_i ||g_i||^2 - ||mean_i g_i||^2`, non-negative by Jensen.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Dissimilarity of a set of gradients.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dissimilarity {
    /// Mean of the squared gradient norms
    pub mean_of_norms: f64,
    /// Squared norm of the mean gradient
    pub norm_of_mean: f64,
    /// `mean_of_norms - norm_of_mean`
    pub value: f64,
}

impl Dissimilarity {
    /// Compute over flattened gradients of identical length.
    pub fn compute(gradients: &[Vec<f32>]) -> Result<Self> {
        let first = gradients.first().ok_or(Error::EmptyPool)?;
        let dim = first.len();

        let mut mean = vec![0.0f64; dim];
        let mut mean_of_norms = 0.0;
        for g in gradients {
            if g.len() != dim {
                return Err(Error::ShapeMismatch {
                    expected: vec![dim],
                    actual: vec![g.len()],
                });
            }
            let mut norm = 0.0;
            for (m, v) in mean.iter_mut().zip(g.iter()) {
                let v = *v as f64;
                *m += v;
                norm += v * v;
            }
            mean_of_norms += norm;
        }

        let n = gradients.len() as f64;
        mean_of_norms /= n;
        let norm_of_mean = mean.iter().map(|m| (m / n) * (m / n)).sum::<f64>();

        Ok(Self {
            mean_of_norms,
            norm_of_mean,
            value: mean_of_norms - norm_of_mean,
        })
    }
}
