// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor, TensorError};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;

/// One mini-batch: `(batch × features)` inputs and their class labels.
pub type Batch = (Tensor, Vec<usize>);

/// In-memory labelled dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    inputs: Tensor,
    labels: Vec<usize>,
}

impl Dataset {
    pub fn new(inputs: Tensor, labels: Vec<usize>) -> PureResult<Self> {
        if inputs.shape().0 != labels.len() {
            return Err(TensorError::BatchMismatch {
                inputs: inputs.shape().0,
                labels: labels.len(),
            });
        }
        Ok(Self { inputs, labels })
    }

    /// Gaussian blobs around one random prototype per class. Labels cycle
    /// through the classes so every class is equally represented.
    pub fn synthetic_classification<R: Rng + ?Sized>(
        samples: usize,
        features: usize,
        classes: usize,
        noise: f32,
        rng: &mut R,
    ) -> PureResult<Self> {
        if classes == 0 {
            return Err(TensorError::InvalidValue {
                label: "synthetic_classes",
            });
        }
        let prototypes = Tensor::random_normal(classes, features, 0.0, 1.0, rng)?;
        let labels: Vec<usize> = (0..samples).map(|idx| idx % classes).collect();
        let mut data = Vec::with_capacity(samples * features);
        for &label in &labels {
            for &center in prototypes.row(label) {
                let jitter: f32 = StandardNormal.sample(&mut *rng);
                data.push(center + noise * jitter);
            }
        }
        Self::new(Tensor::from_vec(samples, features, data)?, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> usize {
        self.inputs.shape().1
    }

    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Splits off the trailing `len - at` samples.
    pub fn split(&self, at: usize) -> PureResult<(Dataset, Dataset)> {
        if at == 0 || at >= self.len() {
            return Err(TensorError::InvalidValue {
                label: "dataset_split",
            });
        }
        let head: Vec<usize> = (0..at).collect();
        let tail: Vec<usize> = (at..self.len()).collect();
        Ok((self.subset(&head)?, self.subset(&tail)?))
    }

    fn subset(&self, indices: &[usize]) -> PureResult<Dataset> {
        Ok(Dataset {
            inputs: self.inputs.select_rows(indices)?,
            labels: indices.iter().map(|&idx| self.labels[idx]).collect(),
        })
    }

    /// Full mini-batches in order, or in a shuffled order when `rng` is
    /// given. A trailing partial batch is dropped.
    pub fn batches(&self, batch_size: usize, rng: Option<&mut StdRng>) -> PureResult<Vec<Batch>> {
        if batch_size == 0 {
            return Err(TensorError::InvalidValue {
                label: "batch_size",
            });
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order
            .chunks_exact(batch_size)
            .map(|chunk| {
                let subset = self.subset(chunk)?;
                Ok((subset.inputs, subset.labels))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn batches_drop_the_partial_tail() {
        let mut rng = StdRng::seed_from_u64(5);
        let data = Dataset::synthetic_classification(10, 3, 2, 0.1, &mut rng).unwrap();
        let batches = data.batches(4, None).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].1, vec![0, 1, 0, 1]);
        assert_eq!(batches[1].0.shape(), (4, 3));
        assert!(data.batches(0, None).is_err());
    }

    #[test]
    fn shuffled_batches_are_a_permutation() {
        let mut rng = StdRng::seed_from_u64(6);
        let data = Dataset::synthetic_classification(8, 2, 4, 0.1, &mut rng).unwrap();
        let batches = data.batches(4, Some(&mut rng)).unwrap();
        let mut labels: Vec<usize> = batches.iter().flat_map(|(_, l)| l.clone()).collect();
        labels.sort_unstable();
        assert_eq!(labels, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn split_and_mismatch() {
        let mut rng = StdRng::seed_from_u64(7);
        let data = Dataset::synthetic_classification(6, 2, 3, 0.1, &mut rng).unwrap();
        let (train, val) = data.split(4).unwrap();
        assert_eq!((train.len(), val.len()), (4, 2));
        assert!(Dataset::new(Tensor::zeros(2, 2).unwrap(), vec![0]).is_err());
    }
}
