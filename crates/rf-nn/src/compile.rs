// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Binds a built [`Network`] to cross-entropy and [`ManifoldSgd`] so callers
//! can train and evaluate it batch by batch.

use crate::loss::{categorical_accuracy, one_hot, CategoricalCrossEntropy, Loss};
use crate::module::Module;
use crate::network::Network;
use crate::optim::ManifoldSgd;
use crate::{PureResult, Tensor, TensorError};

/// Outcome of one training step, measured before the update is applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepStats {
    pub loss: f32,
    pub accuracy: f32,
    pub numeric_warnings: usize,
}

/// Network bound to its loss and optimizer.
#[derive(Debug)]
pub struct CompiledModel {
    network: Network,
    optimizer: ManifoldSgd,
    loss: CategoricalCrossEntropy,
}

/// Builds the optimizer for `network` and wires the cross-entropy objective.
pub fn compile(network: Network, learning_rate: f32) -> PureResult<CompiledModel> {
    let optimizer = ManifoldSgd::for_module(&network.model, &network.manifolds, learning_rate)?;
    Ok(CompiledModel {
        network,
        optimizer,
        loss: CategoricalCrossEntropy::new(),
    })
}

impl CompiledModel {
    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn optimizer(&self) -> &ManifoldSgd {
        &self.optimizer
    }

    pub fn classes(&self) -> usize {
        self.network.config.classes
    }

    fn targets(&self, inputs: &Tensor, labels: &[usize]) -> PureResult<Tensor> {
        if inputs.shape().0 != labels.len() {
            return Err(TensorError::BatchMismatch {
                inputs: inputs.shape().0,
                labels: labels.len(),
            });
        }
        one_hot(labels, self.classes())
    }

    /// Class probabilities for every row of `inputs`.
    pub fn predict(&self, inputs: &Tensor) -> PureResult<Tensor> {
        self.network.model.forward(inputs)
    }

    /// Forward pass, loss, backward pass and one optimizer update.
    pub fn train_step(&mut self, inputs: &Tensor, labels: &[usize]) -> PureResult<StepStats> {
        let targets = self.targets(inputs, labels)?;
        let trace = self.network.model.forward_trace(inputs)?;
        let probs = trace.last().ok_or(TensorError::EmptyInput("train_step"))?;
        let loss = self.loss.forward(probs, &targets)?.data()[0];
        let accuracy = categorical_accuracy(probs, labels)?;

        let grad = self.loss.backward(probs, &targets)?;
        self.network.model.backward_trace(&trace, &grad)?;
        let report = self.optimizer.step(&mut self.network.model)?;
        Ok(StepStats {
            loss,
            accuracy,
            numeric_warnings: report.warning_count(),
        })
    }

    /// Mean cross-entropy of `inputs` against `labels`; parameters are untouched.
    pub fn loss(&self, inputs: &Tensor, labels: &[usize]) -> PureResult<f32> {
        let targets = self.targets(inputs, labels)?;
        let probs = self.predict(inputs)?;
        let mut objective = self.loss;
        Ok(objective.forward(&probs, &targets)?.data()[0])
    }

    pub fn accuracy(&self, inputs: &Tensor, labels: &[usize]) -> PureResult<f32> {
        self.targets(inputs, labels)?;
        categorical_accuracy(&self.predict(inputs)?, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::{FactorConfig, LayerKind};
    use crate::network::{build_network, InputShape, NetworkConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny(kind: LayerKind) -> CompiledModel {
        let config = NetworkConfig {
            input: InputShape::flat(8),
            widths: vec![4],
            kind,
            factors: FactorConfig::default().with_rank(2).with_shape2((2, 2)),
            classes: 3,
        };
        let network = build_network(&config, &mut StdRng::seed_from_u64(12)).unwrap();
        compile(network, 0.1).unwrap()
    }

    #[test]
    fn caller_errors_are_reported_before_any_update() {
        let mut model = tiny(LayerKind::LowRank);
        let inputs = Tensor::zeros(2, 8).unwrap();
        let before = model.network().model.state_dict().unwrap();

        let err = model.train_step(&inputs, &[0]).unwrap_err();
        assert!(matches!(err, TensorError::BatchMismatch { inputs: 2, labels: 1 }));
        let err = model.train_step(&inputs, &[0, 3]).unwrap_err();
        assert!(matches!(err, TensorError::LabelOutOfRange { label: 3, classes: 3 }));
        assert_eq!(err.kind(), crate::ErrorKind::CallerUsage);
        assert_eq!(model.network().model.state_dict().unwrap(), before);
    }

    #[test]
    fn every_kind_trains_one_step() {
        for kind in [LayerKind::Dense, LayerKind::LowRank, LayerKind::Kron, LayerKind::UvKron] {
            let mut model = tiny(kind);
            let inputs = Tensor::from_fn(3, 8, |r, c| ((r + 2 * c) as f32 * 0.3).cos()).unwrap();
            let stats = model.train_step(&inputs, &[0, 1, 2]).unwrap();
            assert!(stats.loss.is_finite() && stats.loss > 0.0, "{kind}: {stats:?}");
            assert!((0.0..=1.0).contains(&stats.accuracy));
            assert_eq!(model.predict(&inputs).unwrap().shape(), (3, 3));
        }
    }

    #[test]
    fn train_step_reconstructs_each_factored_weight_once() {
        let mut model = tiny(LayerKind::Kron);
        let inputs = Tensor::from_fn(3, 8, |r, c| ((r * 3 + c) as f32 * 0.2).sin()).unwrap();
        let count = |model: &CompiledModel| {
            let mut total = 0;
            model
                .network()
                .model
                .visit_factor_sets(&mut |set| {
                    total += set.reconstruction_count();
                    Ok(())
                })
                .unwrap();
            total
        };
        let before = count(&model);
        let stats = model.train_step(&inputs, &[2, 0, 1]).unwrap();
        assert_eq!(count(&model) - before, 1);

        // Evaluation sees the updated parameters without rebuilding them twice.
        let after = model.loss(&inputs, &[2, 0, 1]).unwrap();
        assert!(after.is_finite());
        assert_ne!(after, stats.loss);
    }

    #[test]
    fn unbound_manifold_groups_fail_compilation() {
        let config = NetworkConfig {
            input: InputShape::flat(8),
            widths: vec![4],
            kind: LayerKind::UvKron,
            factors: FactorConfig::default().with_rank(2).with_shape2((2, 2)),
            classes: 3,
        };
        let mut network = build_network(&config, &mut StdRng::seed_from_u64(12)).unwrap();
        let name = crate::network::first_layer_name(LayerKind::UvKron);
        network
            .manifolds
            .register(
                crate::manifold::ManifoldDescriptor::new(
                    name,
                    crate::manifold::FixedRank::new(8, 4, 2).unwrap(),
                    vec![format!("{name}::u"), format!("{name}::v")],
                )
                .unwrap(),
            )
            .unwrap();
        let err = compile(network, 0.1).unwrap_err();
        assert!(matches!(err, TensorError::UnboundManifold { .. }));
    }
}
