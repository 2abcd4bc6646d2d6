// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

mod categorical_cross_entropy;

use crate::{PureResult, Tensor, TensorError};

pub use categorical_cross_entropy::CategoricalCrossEntropy;

/// Differentiable objective over a batch of predictions.
pub trait Loss {
    /// Mean loss as a `1 × 1` tensor.
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;

    /// Gradient with respect to the predictions, already averaged over the
    /// batch.
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;
}

/// One-hot encodes class indices into a `labels.len() × classes` tensor.
pub fn one_hot(labels: &[usize], classes: usize) -> PureResult<Tensor> {
    if labels.is_empty() {
        return Err(TensorError::EmptyInput("one_hot"));
    }
    if let Some(&label) = labels.iter().find(|&&label| label >= classes) {
        return Err(TensorError::LabelOutOfRange { label, classes });
    }
    Tensor::from_fn(labels.len(), classes, |r, c| {
        if labels[r] == c {
            1.0
        } else {
            0.0
        }
    })
}

/// Fraction of rows whose argmax matches the label.
pub fn categorical_accuracy(prediction: &Tensor, labels: &[usize]) -> PureResult<f32> {
    if prediction.shape().0 != labels.len() {
        return Err(TensorError::BatchMismatch {
            inputs: prediction.shape().0,
            labels: labels.len(),
        });
    }
    let hits = prediction
        .argmax_rows()
        .iter()
        .zip(labels)
        .filter(|(predicted, label)| predicted == label)
        .count();
    Ok(hits as f32 / labels.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_rejects_out_of_range_labels() {
        let encoded = one_hot(&[2, 0], 3).unwrap();
        assert_eq!(encoded.data(), &[0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert!(matches!(
            one_hot(&[3], 3),
            Err(TensorError::LabelOutOfRange { label: 3, classes: 3 })
        ));
    }

    #[test]
    fn accuracy_counts_argmax_hits() {
        let prediction = Tensor::from_vec(2, 2, vec![0.9, 0.1, 0.3, 0.7]).unwrap();
        assert_eq!(categorical_accuracy(&prediction, &[0, 0]).unwrap(), 0.5);
        assert!(categorical_accuracy(&prediction, &[0]).is_err());
    }
}
