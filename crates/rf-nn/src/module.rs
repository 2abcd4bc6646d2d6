// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::factor::FactorSet;
use crate::registry::ParameterRegistry;
use crate::{PureResult, Tensor, TensorError};
use std::collections::HashMap;

/// Trainable tensor with a local Euclidean gradient buffer.
pub struct Parameter {
    name: String,
    value: Tensor,
    gradient: Option<Tensor>,
}

impl core::fmt::Debug for Parameter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (rows, cols) = self.value.shape();
        write!(
            f,
            "Parameter(name={},shape=({},{}),has_grad={})",
            self.name,
            rows,
            cols,
            self.gradient.is_some()
        )
    }
}

impl Parameter {
    /// Creates a new parameter with the provided tensor value.
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value,
            gradient: None,
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provides an immutable view into the underlying tensor value.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Returns the accumulated Euclidean gradient, if any.
    pub fn gradient(&self) -> Option<&Tensor> {
        self.gradient.as_ref()
    }

    fn assert_shape(&self, tensor: &Tensor) -> PureResult<()> {
        if self.value.shape() != tensor.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.value.shape(),
                right: tensor.shape(),
            });
        }
        Ok(())
    }

    /// Adds `update` to the gradient buffer.
    pub fn accumulate_euclidean(&mut self, update: &Tensor) -> PureResult<()> {
        self.assert_shape(update)?;
        match self.gradient.as_mut() {
            Some(existing) => existing.add_scaled(update, 1.0)?,
            None => {
                self.gradient = Some(update.clone());
            }
        }
        Ok(())
    }

    /// Drops the cached gradient.
    pub fn zero_gradient(&mut self) {
        self.gradient = None;
    }

    /// Replaces the parameter value with the provided tensor.
    pub fn load_value(&mut self, value: &Tensor) -> PureResult<()> {
        self.assert_shape(value)?;
        self.value = value.clone();
        Ok(())
    }
}

/// `nn.Module`-style layer contract. Backward passes accumulate into the
/// parameter (and factor set) buffers; the optimizer reads and clears them.
pub trait Module {
    /// Runs a forward pass.
    fn forward(&self, input: &Tensor) -> PureResult<Tensor>;

    /// Propagates a gradient backwards. Implementations should populate the
    /// relevant parameter accumulators before returning the gradient with
    /// respect to `input`.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor>;

    /// Visits immutable parameters in a stable order.
    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits mutable parameters in the same order as [`Module::visit_parameters`].
    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()>;

    /// Visits the factor sets owned by the module. Plain layers own none.
    fn visit_factor_sets(
        &self,
        _visitor: &mut dyn FnMut(&FactorSet) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    /// Mutable counterpart of [`Module::visit_factor_sets`].
    fn visit_factor_sets_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut FactorSet) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    /// Clears accumulators across every parameter and factor set.
    fn zero_accumulators(&mut self) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            param.zero_gradient();
            Ok(())
        })?;
        self.visit_factor_sets_mut(&mut |set| {
            set.clear_ambient();
            Ok(())
        })
    }

    /// Ordered name → shape listing of every parameter.
    fn parameter_registry(&self) -> PureResult<ParameterRegistry> {
        let mut registry = ParameterRegistry::new();
        self.visit_parameters(&mut |param| registry.insert(param.name(), param.value().shape()))?;
        Ok(registry)
    }

    /// Captures a copy of every parameter tensor keyed by its canonical name.
    fn state_dict(&self) -> PureResult<HashMap<String, Tensor>> {
        let mut state = HashMap::new();
        self.visit_parameters(&mut |param| {
            state.insert(param.name().to_string(), param.value().clone());
            Ok(())
        })?;
        Ok(state)
    }

    /// Restores parameters from a state dictionary produced by [`Module::state_dict`].
    fn load_state_dict(&mut self, state: &HashMap<String, Tensor>) -> PureResult<()> {
        self.visit_parameters_mut(&mut |param| {
            let Some(value) = state.get(param.name()) else {
                return Err(TensorError::MissingParameter {
                    name: param.name().to_string(),
                });
            };
            param.load_value(value)
        })
    }
}
