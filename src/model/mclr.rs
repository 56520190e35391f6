//! Multinomial logistic regression ("mclr").
//!
//! Parameters are a `[classes, dim]` weight matrix followed by a `[classes]`
//! bias. Loss is softmax cross-entropy.

use crate::core::Sample;
use crate::model::objective::Objective;
use crate::model::params::{ModelParams, ParamTensor};

/// Softmax classifier over dense features.
#[derive(Clone, Debug)]
pub struct MclrLogistic {
    /// Input feature dimension
    pub input_dim: usize,
    /// Number of classes
    pub output_dim: usize,
    /// L2 regularization strength
    weight_decay: f32,
}

impl MclrLogistic {
    /// Create a new classifier.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            weight_decay: 0.0,
        }
    }

    /// Set L2 regularization.
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    fn logits(&self, params: &ModelParams, features: &[f32]) -> Vec<f64> {
        let weights = &params.tensors[0].values;
        let bias = &params.tensors[1].values;
        (0..self.output_dim)
            .map(|k| {
                let row = &weights[k * self.input_dim..(k + 1) * self.input_dim];
                row.iter()
                    .zip(features.iter())
                    .map(|(w, x)| (*w as f64) * (*x as f64))
                    .sum::<f64>()
                    + bias[k] as f64
            })
            .collect()
    }

    fn softmax(logits: &[f64]) -> Vec<f64> {
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|e| e / total).collect()
    }

    fn cross_entropy(probs: &[f64], label: usize) -> f64 {
        -probs[label].max(1e-12).ln()
    }
}

impl Objective for MclrLogistic {
    fn init_params(&self) -> ModelParams {
        ModelParams::new(vec![
            ParamTensor::zeros(&[self.output_dim, self.input_dim]),
            ParamTensor::zeros(&[self.output_dim]),
        ])
    }

    fn sample_loss(&self, params: &ModelParams, sample: &Sample) -> f64 {
        let probs = Self::softmax(&self.logits(params, &sample.features));
        Self::cross_entropy(&probs, sample.label)
    }

    fn accumulate_gradient(
        &self,
        params: &ModelParams,
        sample: &Sample,
        grad: &mut ModelParams,
    ) -> f64 {
        let probs = Self::softmax(&self.logits(params, &sample.features));
        let (weight_grad, bias_grad) = grad.tensors.split_at_mut(1);
        let weight_grad = &mut weight_grad[0].values;
        let bias_grad = &mut bias_grad[0].values;

        for (k, p) in probs.iter().enumerate() {
            let err = (*p - if k == sample.label { 1.0 } else { 0.0 }) as f32;
            let row = &mut weight_grad[k * self.input_dim..(k + 1) * self.input_dim];
            for (g, x) in row.iter_mut().zip(sample.features.iter()) {
                *g += err * x;
            }
            bias_grad[k] += err;
        }

        Self::cross_entropy(&probs, sample.label)
    }

    fn predict(&self, params: &ModelParams, features: &[f32]) -> usize {
        self.logits(params, features)
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(best, best_z), (k, z)| {
                if *z > best_z {
                    (k, *z)
                } else {
                    (best, best_z)
                }
            })
            .0
    }

    fn weight_decay(&self) -> f32 {
        self.weight_decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_data() -> Vec<Sample> {
        vec![
            Sample::new(vec![1.0, 0.0], 0),
            Sample::new(vec![0.9, 0.1], 0),
            Sample::new(vec![0.0, 1.0], 1),
            Sample::new(vec![0.1, 0.9], 1),
        ]
    }

    #[test]
    fn test_zero_params_uniform_loss() {
        let model = MclrLogistic::new(2, 2);
        let params = model.init_params();
        let loss = model.sample_loss(&params, &Sample::new(vec![1.0, 0.0], 0));
        assert!((loss - 2f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let model = MclrLogistic::new(2, 3);
        let mut params = model.init_params();
        params.tensors[0].values = vec![0.1, -0.2, 0.3, 0.05, -0.1, 0.2];
        let sample = Sample::new(vec![0.5, -1.5], 2);

        let mut grad = params.zeros_like();
        model.accumulate_gradient(&params, &sample, &mut grad);

        let eps = 1e-3f32;
        for i in 0..6 {
            let mut plus = params.clone();
            plus.tensors[0].values[i] += eps;
            let mut minus = params.clone();
            minus.tensors[0].values[i] -= eps;
            let numeric = (model.sample_loss(&plus, &sample) - model.sample_loss(&minus, &sample))
                / (2.0 * eps as f64);
            assert!((numeric - grad.tensors[0].values[i] as f64).abs() < 1e-3);
        }
    }

    #[test]
    fn test_gradient_descent_learns_toy_problem() {
        let model = MclrLogistic::new(2, 2);
        let data = toy_data();
        let batch: Vec<&Sample> = data.iter().collect();
        let mut params = model.init_params();

        let before = model.evaluate(&params, &data).loss;
        for _ in 0..200 {
            let (grad, _) = model.mean_gradient(&params, &batch);
            params.add_scaled(&grad, -0.5).unwrap();
        }
        let after = model.evaluate(&params, &data);

        assert!(after.loss < before);
        assert_eq!(after.correct, 4);
        assert!((after.accuracy() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_weight_decay_adds_penalty() {
        let model = MclrLogistic::new(2, 2).with_weight_decay(0.1);
        let mut params = model.init_params();
        params.tensors[0].values = vec![1.0, 0.0, 0.0, 1.0];
        let data = toy_data();
        let plain = MclrLogistic::new(2, 2);
        let diff = model.evaluate(&params, &data).loss - plain.evaluate(&params, &data).loss;
        assert!((diff - 0.1).abs() < 1e-9);
    }
}
