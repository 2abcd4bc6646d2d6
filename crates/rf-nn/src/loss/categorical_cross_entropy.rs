// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::Loss;
use crate::{PureResult, Tensor, TensorError};

/// Cross entropy between softmax probabilities and one-hot targets.
#[derive(Debug, Clone, Copy)]
pub struct CategoricalCrossEntropy {
    epsilon: f32,
}

impl Default for CategoricalCrossEntropy {
    fn default() -> Self {
        Self { epsilon: 1e-7 }
    }
}

impl CategoricalCrossEntropy {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(prediction: &Tensor, target: &Tensor) -> PureResult<()> {
        if prediction.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                left: prediction.shape(),
                right: target.shape(),
            });
        }
        Ok(())
    }
}

impl Loss for CategoricalCrossEntropy {
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        Self::check(prediction, target)?;
        let rows = prediction.shape().0;
        let mut sum = 0.0f32;
        for (pred, tgt) in prediction.data().iter().zip(target.data().iter()) {
            let p = pred.clamp(self.epsilon, 1.0 - self.epsilon);
            sum += -tgt * p.ln();
        }
        Tensor::from_vec(1, 1, vec![sum / rows as f32])
    }

    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        Self::check(prediction, target)?;
        let (rows, cols) = prediction.shape();
        let inv_batch = 1.0 / rows as f32;
        let mut grad = Vec::with_capacity(rows * cols);
        for (pred, tgt) in prediction.data().iter().zip(target.data().iter()) {
            let p = pred.clamp(self.epsilon, 1.0 - self.epsilon);
            grad.push(-tgt / p * inv_batch);
        }
        Tensor::from_vec(rows, cols, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn categorical_ce_matches_manual() {
        let mut loss = CategoricalCrossEntropy::new();
        let prediction = Tensor::from_vec(2, 3, vec![0.1, 0.6, 0.3, 0.8, 0.1, 0.1]).unwrap();
        let target = Tensor::from_vec(2, 3, vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0]).unwrap();
        let value = loss.forward(&prediction, &target).unwrap();
        let expected = (-0.6_f32.ln() - 0.8_f32.ln()) / 2.0;
        assert_abs_diff_eq!(value.data()[0], expected, epsilon = 1e-6);

        let grad = loss.backward(&prediction, &target).unwrap();
        assert_abs_diff_eq!(grad.data()[1], -1.0 / (0.6 * 2.0), epsilon = 1e-6);
        assert_eq!(grad.data()[0], 0.0);
    }

    #[test]
    fn saturated_predictions_stay_finite() {
        let mut loss = CategoricalCrossEntropy::new();
        let prediction = Tensor::from_vec(1, 2, vec![0.0, 1.0]).unwrap();
        let target = Tensor::from_vec(1, 2, vec![1.0, 0.0]).unwrap();
        assert!(loss.forward(&prediction, &target).unwrap().is_finite());
        assert!(loss.backward(&prediction, &target).unwrap().is_finite());
    }
}
