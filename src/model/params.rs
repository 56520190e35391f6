//! Model parameters as an ordered list of tensors.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A dense parameter tensor stored row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Flattened values
    pub values: Vec<f32>,
}

impl ParamTensor {
    /// Create a zero tensor with the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            values: vec![0.0; len],
        }
    }

    /// Create a tensor from existing values.
    pub fn from_values(shape: &[usize], values: Vec<f32>) -> Result<Self> {
        let len: usize = shape.iter().product();
        if values.len() != len {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![values.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            values,
        })
    }

    /// Number of scalar entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the tensor has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Ordered parameter tensors of a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Parameter tensors in layer order
    pub tensors: Vec<ParamTensor>,
}

impl ModelParams {
    /// Create from tensors.
    pub fn new(tensors: Vec<ParamTensor>) -> Self {
        Self { tensors }
    }

    /// Zero parameters with the same shapes.
    pub fn zeros_like(&self) -> Self {
        Self {
            tensors: self
                .tensors
                .iter()
                .map(|t| ParamTensor::zeros(&t.shape))
                .collect(),
        }
    }

    /// Shapes of all tensors.
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape.clone()).collect()
    }

    /// Total number of scalar parameters.
    pub fn param_count(&self) -> usize {
        self.tensors.iter().map(|t| t.len()).sum()
    }

    /// Fail unless `other` has identical tensor shapes.
    pub fn check_compatible(&self, other: &ModelParams) -> Result<()> {
        if self.tensors.len() != other.tensors.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![self.tensors.len()],
                actual: vec![other.tensors.len()],
            });
        }
        for (a, b) in self.tensors.iter().zip(other.tensors.iter()) {
            if a.shape != b.shape {
                return Err(Error::ShapeMismatch {
                    expected: a.shape.clone(),
                    actual: b.shape.clone(),
                });
            }
        }
        Ok(())
    }

    /// Overwrite values with those of `other`.
    pub fn copy_from(&mut self, other: &ModelParams) -> Result<()> {
        self.check_compatible(other)?;
        for (dst, src) in self.tensors.iter_mut().zip(other.tensors.iter()) {
            dst.values.copy_from_slice(&src.values);
        }
        Ok(())
    }

    /// `self += scale * other`.
    pub fn add_scaled(&mut self, other: &ModelParams, scale: f32) -> Result<()> {
        self.check_compatible(other)?;
        for (dst, src) in self.tensors.iter_mut().zip(other.tensors.iter()) {
            for (d, s) in dst.values.iter_mut().zip(src.values.iter()) {
                *d += scale * s;
            }
        }
        Ok(())
    }

    /// `self - other` as a new set of parameters.
    pub fn difference(&self, other: &ModelParams) -> Result<ModelParams> {
        let mut out = self.clone();
        out.add_scaled(other, -1.0)?;
        Ok(out)
    }

    /// Multiply every entry by `scale`.
    pub fn scale(&mut self, scale: f32) {
        for tensor in &mut self.tensors {
            for v in &mut tensor.values {
                *v *= scale;
            }
        }
    }

    /// Set every entry to zero.
    pub fn fill_zero(&mut self) {
        for tensor in &mut self.tensors {
            tensor.values.fill(0.0);
        }
    }

    /// Squared L2 norm over all tensors.
    pub fn norm_squared(&self) -> f64 {
        self.tensors
            .iter()
            .flat_map(|t| t.values.iter())
            .map(|v| (*v as f64) * (*v as f64))
            .sum()
    }

    /// L2 norm over all tensors.
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Concatenate all tensors into one vector.
    pub fn flatten(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.param_count());
        for tensor in &self.tensors {
            flat.extend_from_slice(&tensor.values);
        }
        flat
    }

    /// Iterate mutably over every scalar.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.tensors.iter_mut().flat_map(|t| t.values.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(a: Vec<f32>, b: Vec<f32>) -> ModelParams {
        ModelParams::new(vec![
            ParamTensor::from_values(&[a.len()], a).unwrap(),
            ParamTensor::from_values(&[b.len()], b).unwrap(),
        ])
    }

    #[test]
    fn test_from_values_checks_length() {
        assert!(ParamTensor::from_values(&[2, 2], vec![1.0; 3]).is_err());
        assert!(ParamTensor::from_values(&[2, 2], vec![1.0; 4]).is_ok());
    }

    #[test]
    fn test_add_scaled_and_difference() {
        let mut a = params(vec![1.0, 2.0], vec![3.0]);
        let b = params(vec![1.0, 1.0], vec![1.0]);
        a.add_scaled(&b, 2.0).unwrap();
        assert_eq!(a.flatten(), vec![3.0, 4.0, 5.0]);

        let diff = a.difference(&b).unwrap();
        assert_eq!(diff.flatten(), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_norm() {
        let p = params(vec![3.0], vec![4.0]);
        assert!((p.norm() - 5.0).abs() < 1e-12);
        assert_eq!(p.param_count(), 2);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut a = params(vec![1.0, 2.0], vec![3.0]);
        let b = params(vec![1.0], vec![1.0, 2.0]);
        assert!(matches!(
            a.add_scaled(&b, 1.0),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(a.copy_from(&b).is_err());
    }

    #[test]
    fn test_zeros_like() {
        let a = params(vec![1.0, 2.0], vec![3.0]);
        let z = a.zeros_like();
        assert_eq!(z.shapes(), a.shapes());
        assert_eq!(z.norm(), 0.0);
    }
}
