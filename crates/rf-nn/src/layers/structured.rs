// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense-style layer whose weight is held by a [`FactorSet`].

use super::activation::Activation;
use crate::factor::{FactorConfig, FactorSet, LayerKind};
use crate::manifold::ManifoldDescriptor;
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use rand::Rng;
use std::cell::RefCell;
use tracing::debug;

/// `activation(x·W + b)` with `W` reconstructed from its factors.
#[derive(Debug)]
pub struct StructuredDense {
    factors: FactorSet,
    bias: Parameter,
    activation: Activation,
    manifold: Option<ManifoldDescriptor>,
    cache: RefCell<Option<ForwardCache>>,
}

/// Weight and pre-activation from the latest forward, keyed by its input.
#[derive(Debug)]
struct ForwardCache {
    input: Tensor,
    weight: Tensor,
    pre: Tensor,
}

impl StructuredDense {
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        input_width: usize,
        output_width: usize,
        kind: LayerKind,
        config: &FactorConfig,
        activation: Activation,
        rng: &mut R,
    ) -> PureResult<Self> {
        if input_width == 0 || output_width == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_width,
                cols: output_width,
            });
        }
        let name = name.into();
        let factors = FactorSet::from_config(name.as_str(), input_width, output_width, kind, config, rng)?;
        let manifold = factors.manifold()?;
        debug!(
            layer = %name,
            kind = %kind,
            rank = ?factors.rank(),
            params = factors.parameter_count() + output_width,
            manifold = manifold.is_some(),
            "structured layer allocated"
        );
        Ok(Self {
            factors,
            bias: Parameter::new(format!("{name}::bias"), Tensor::zeros(1, output_width)?),
            activation,
            manifold,
            cache: RefCell::new(None),
        })
    }

    pub fn factors(&self) -> &FactorSet {
        &self.factors
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    /// Manifold the factors live on; `None` for unconstrained variants.
    pub fn manifold(&self) -> Option<&ManifoldDescriptor> {
        self.manifold.as_ref()
    }

    fn pre_activation(&self, input: &Tensor, weight: &Tensor) -> PureResult<Tensor> {
        if input.shape().1 != weight.shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: weight.shape(),
            });
        }
        let mut out = input.matmul(weight)?;
        out.add_row_inplace(self.bias.value().data())?;
        Ok(out)
    }
}

impl Module for StructuredDense {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let weight = self.factors.effective_weight()?;
        let pre = self.pre_activation(input, &weight)?;
        let out = self.activation.forward(&pre)?;
        self.cache.replace(Some(ForwardCache {
            input: input.clone(),
            weight,
            pre,
        }));
        Ok(out)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.shape().0 != grad_output.shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let cached = self.cache.get_mut().take().filter(|cache| cache.input == *input);
        let (weight, pre) = match cached {
            Some(cache) => (cache.weight, cache.pre),
            None => {
                let weight = self.factors.effective_weight()?;
                let pre = self.pre_activation(input, &weight)?;
                (weight, pre)
            }
        };
        let grad_pre = self.activation.backward(&pre, grad_output)?;

        let grad_w = input.transpose().matmul(&grad_pre)?;
        self.factors.backprop(&grad_w)?;
        let summed = grad_pre.sum_axis0();
        self.bias
            .accumulate_euclidean(&Tensor::from_vec(1, summed.len(), summed)?)?;

        grad_pre.matmul(&weight.transpose())
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.factors.visit_parameters(visitor)?;
        visitor(&self.bias)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.cache.get_mut().take();
        self.factors.visit_parameters_mut(visitor)?;
        visitor(&mut self.bias)
    }

    fn visit_factor_sets(
        &self,
        visitor: &mut dyn FnMut(&FactorSet) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.factors)
    }

    fn visit_factor_sets_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut FactorSet) -> PureResult<()>,
    ) -> PureResult<()> {
        self.cache.get_mut().take();
        visitor(&mut self.factors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::Factorization;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn layer(kind: LayerKind, config: &FactorConfig, width: usize) -> PureResult<StructuredDense> {
        StructuredDense::new(
            "fixedrank0",
            784,
            width,
            kind,
            config,
            Activation::Rectify,
            &mut StdRng::seed_from_u64(21),
        )
    }

    #[test]
    fn parameters_enumerate_factors_then_bias() {
        let layer = layer(LayerKind::LowRank, &FactorConfig::default().with_rank(2), 16).unwrap();
        let mut names = Vec::new();
        layer
            .visit_parameters(&mut |param| {
                names.push(param.name().to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(names, ["fixedrank0::u", "fixedrank0::v", "fixedrank0::bias"]);
        let manifold = layer.manifold().unwrap();
        assert_eq!(manifold.member_shapes(), [(784, 2), (2, 16)]);
    }

    #[test]
    fn kronecker_width_must_divide_block_shape() {
        let config = FactorConfig::default().with_rank(2).with_shape2((4, 4));
        let ok = layer(LayerKind::Kron, &config, 16).unwrap();
        assert_eq!(ok.manifold().unwrap().member_shapes(), [(196 * 4, 2), (2, 16)]);
        let err = layer(LayerKind::Kron, &config, 18).unwrap_err();
        assert!(matches!(err, TensorError::KroneckerIndivisible { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn full_rank_ablation_has_no_manifold() {
        let config = FactorConfig::default().with_rank(2).full_rank();
        let layer = layer(LayerKind::Kron, &config, 18).unwrap();
        assert!(layer.manifold().is_none());
        assert_eq!(layer.factors().factorization(), Factorization::Full);
        let out = layer.forward(&Tensor::zeros(3, 784).unwrap()).unwrap();
        assert_eq!(out.shape(), (3, 18));
    }

    #[test]
    fn backward_matches_finite_differences_on_inputs() {
        let mut layer = StructuredDense::new(
            "uv0",
            8,
            4,
            LayerKind::UvKron,
            &FactorConfig::default().with_rank(2).with_shape2((2, 2)),
            Activation::Identity,
            &mut StdRng::seed_from_u64(8),
        )
        .unwrap();
        let input = Tensor::from_fn(1, 8, |_, c| (c as f32 - 3.5) * 0.1).unwrap();
        let grad_out = Tensor::from_vec(1, 4, vec![1.0, -0.5, 0.25, 2.0]).unwrap();
        let grad_in = layer.backward(&input, &grad_out).unwrap();

        let objective = |x: &Tensor| -> f32 {
            let out = layer.forward(x).unwrap();
            out.data().iter().zip(grad_out.data()).map(|(a, g)| a * g).sum()
        };
        let eps = 1e-2;
        for idx in 0..8 {
            let mut plus = input.clone();
            plus.data_mut()[idx] += eps;
            let mut minus = input.clone();
            minus.data_mut()[idx] -= eps;
            let numeric = (objective(&plus) - objective(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(numeric, grad_in.data()[idx], epsilon = 1e-3);
        }
        assert!(layer.factors().ambient_gradient().is_none());
    }

    #[test]
    fn backward_reuses_the_forward_reconstruction() {
        let mut layer = StructuredDense::new(
            "kron_fixedrank0",
            8,
            4,
            LayerKind::Kron,
            &FactorConfig::default().with_rank(2).with_shape2((2, 2)),
            Activation::Rectify,
            &mut StdRng::seed_from_u64(9),
        )
        .unwrap();
        let input = Tensor::from_fn(3, 8, |r, c| ((r * 8 + c) as f32 * 0.4).cos()).unwrap();
        let other = input.scale(0.5).unwrap();
        let grad_out = Tensor::from_fn(3, 4, |r, c| (r as f32) - (c as f32) * 0.25).unwrap();

        let out = layer.forward(&input).unwrap();
        let cached_grad = layer.backward(&input, &grad_out).unwrap();
        assert_eq!(layer.factors().reconstruction_count(), 1);

        // A mismatched input, or a parameter write in between, forces a rebuild.
        layer.forward(&other).unwrap();
        layer.backward(&input, &grad_out).unwrap();
        assert_eq!(layer.factors().reconstruction_count(), 3);
        layer.forward(&input).unwrap();
        layer.zero_accumulators().unwrap();
        let fresh_grad = layer.backward(&input, &grad_out).unwrap();
        assert_eq!(layer.factors().reconstruction_count(), 5);

        assert_eq!(cached_grad, fresh_grad);
        assert_eq!(layer.forward(&input).unwrap(), out);
    }
}
