//! Local training objective.
//!
//! The coordinator never looks inside a model; participants only need a
//! per-sample loss, its gradient and a class prediction.

use crate::core::Sample;
use crate::model::params::ModelParams;

/// Correct predictions and loss over a data shard.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Number of correctly classified samples
    pub correct: usize,
    /// Mean loss (including regularization)
    pub loss: f64,
    /// Number of samples evaluated
    pub samples: usize,
}

impl Evaluation {
    /// Fraction of correct predictions.
    pub fn accuracy(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.correct as f64 / self.samples as f64
    }
}

/// A differentiable supervised objective over parameter tensors.
pub trait Objective: Send + Sync {
    /// Initial parameters of the model.
    fn init_params(&self) -> ModelParams;

    /// Data loss of a single sample, without regularization.
    fn sample_loss(&self, params: &ModelParams, sample: &Sample) -> f64;

    /// Add the data-loss gradient of `sample` to `grad`; returns the loss.
    fn accumulate_gradient(
        &self,
        params: &ModelParams,
        sample: &Sample,
        grad: &mut ModelParams,
    ) -> f64;

    /// Predicted class for a feature vector.
    fn predict(&self, params: &ModelParams, features: &[f32]) -> usize;

    /// L2 regularization strength.
    fn weight_decay(&self) -> f32 {
        0.0
    }

    /// Add the regularization gradient `L * w` to `grad`.
    fn add_regularization(&self, params: &ModelParams, grad: &mut ModelParams) {
        let decay = self.weight_decay();
        if decay == 0.0 {
            return;
        }
        for (g, w) in grad
            .tensors
            .iter_mut()
            .zip(params.tensors.iter())
            .flat_map(|(g, w)| g.values.iter_mut().zip(w.values.iter()))
        {
            *g += decay * w;
        }
    }

    /// Mean gradient and mean loss over `batch`, regularization included.
    fn mean_gradient(&self, params: &ModelParams, batch: &[&Sample]) -> (ModelParams, f64) {
        let mut grad = params.zeros_like();
        if batch.is_empty() {
            return (grad, 0.0);
        }
        let mut loss = 0.0;
        for sample in batch {
            loss += self.accumulate_gradient(params, sample, &mut grad);
        }
        let n = batch.len() as f32;
        grad.scale(1.0 / n);
        self.add_regularization(params, &mut grad);
        (
            grad,
            loss / batch.len() as f64 + self.regularization_loss(params),
        )
    }

    /// `L / 2 * ||w||^2`.
    fn regularization_loss(&self, params: &ModelParams) -> f64 {
        let decay = self.weight_decay() as f64;
        if decay == 0.0 {
            return 0.0;
        }
        0.5 * decay * params.norm_squared()
    }

    /// Accuracy and mean loss over a data shard.
    fn evaluate(&self, params: &ModelParams, data: &[Sample]) -> Evaluation {
        if data.is_empty() {
            return Evaluation::default();
        }
        let mut correct = 0;
        let mut loss = 0.0;
        for sample in data {
            if self.predict(params, &sample.features) == sample.label {
                correct += 1;
            }
            loss += self.sample_loss(params, sample);
        }
        Evaluation {
            correct,
            loss: loss / data.len() as f64 + self.regularization_loss(params),
            samples: data.len(),
        }
    }
}
