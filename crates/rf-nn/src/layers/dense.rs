// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::activation::Activation;
use crate::factor::glorot_uniform;
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use rand::Rng;
use std::cell::RefCell;

/// Fully-connected layer `activation(x·W + b)` with an unconstrained weight.
#[derive(Debug)]
pub struct Dense {
    weight: Parameter,
    bias: Parameter,
    activation: Activation,
    /// `(input, pre-activation)` of the latest forward.
    cache: RefCell<Option<(Tensor, Tensor)>>,
}

impl Dense {
    /// Glorot-uniform weight, zero bias.
    pub fn new<R: Rng + ?Sized>(
        name: impl Into<String>,
        input_dim: usize,
        output_dim: usize,
        activation: Activation,
        rng: &mut R,
    ) -> PureResult<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_dim,
                cols: output_dim,
            });
        }
        let name = name.into();
        let weight = glorot_uniform(input_dim, output_dim, rng)?;
        let bias = Tensor::zeros(1, output_dim)?;
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
            activation,
            cache: RefCell::new(None),
        })
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    fn pre_activation(&self, input: &Tensor) -> PureResult<Tensor> {
        if input.shape().1 != self.weight.value().shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: self.weight.value().shape(),
            });
        }
        let mut out = input.matmul(self.weight.value())?;
        out.add_row_inplace(self.bias.value().data())?;
        Ok(out)
    }
}

impl Module for Dense {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let pre = self.pre_activation(input)?;
        let out = self.activation.forward(&pre)?;
        self.cache.replace(Some((input.clone(), pre)));
        Ok(out)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.shape().0 != grad_output.shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let pre = match self.cache.get_mut().take() {
            Some((cached_input, pre)) if cached_input == *input => pre,
            _ => self.pre_activation(input)?,
        };
        let grad_pre = self.activation.backward(&pre, grad_output)?;

        let grad_w = input.transpose().matmul(&grad_pre)?;
        self.weight.accumulate_euclidean(&grad_w)?;
        let summed = grad_pre.sum_axis0();
        let grad_b = Tensor::from_vec(1, summed.len(), summed)?;
        self.bias.accumulate_euclidean(&grad_b)?;

        grad_pre.matmul(&self.weight.value().transpose())
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)?;
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.cache.get_mut().take();
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)?;
        Ok(())
    }
}
