// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::factor::FactorSet;
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Ordered stack of layers.
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl core::fmt::Debug for Sequential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Sequential(num_layers={})", self.layers.len())
    }
}

impl Sequential {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push<M>(&mut self, layer: M)
    where
        M: Module + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Input of every layer followed by the final output.
    pub fn forward_trace(&self, input: &Tensor) -> PureResult<Vec<Tensor>> {
        let mut trace = Vec::with_capacity(self.layers.len() + 1);
        trace.push(input.clone());
        for layer in &self.layers {
            let next = match trace.last() {
                Some(current) => layer.forward(current)?,
                None => layer.forward(input)?,
            };
            trace.push(next);
        }
        Ok(trace)
    }

    /// Backward pass over a trace produced by [`Sequential::forward_trace`],
    /// so the forward does not have to run again.
    pub fn backward_trace(&mut self, trace: &[Tensor], grad_output: &Tensor) -> PureResult<Tensor> {
        if trace.len() != self.layers.len() + 1 {
            return Err(TensorError::DataLength {
                expected: self.layers.len() + 1,
                got: trace.len(),
            });
        }
        let mut grad = grad_output.clone();
        for (layer, layer_input) in self.layers.iter_mut().zip(trace.iter()).rev() {
            grad = layer.backward(layer_input, &grad)?;
        }
        Ok(grad)
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut activ = input.clone();
        for layer in &self.layers {
            activ = layer.forward(&activ)?;
        }
        Ok(activ)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let trace = self.forward_trace(input)?;
        self.backward_trace(&trace, grad_output)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &self.layers {
            layer.visit_parameters(visitor)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &mut self.layers {
            layer.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }

    fn visit_factor_sets(
        &self,
        visitor: &mut dyn FnMut(&FactorSet) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &self.layers {
            layer.visit_factor_sets(visitor)?;
        }
        Ok(())
    }

    fn visit_factor_sets_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut FactorSet) -> PureResult<()>,
    ) -> PureResult<()> {
        for layer in &mut self.layers {
            layer.visit_factor_sets_mut(visitor)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Activation, Dense};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn trace_backward_rejects_a_foreign_trace() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut seq = Sequential::new();
        seq.push(Dense::new("l1", 2, 2, Activation::Identity, &mut rng).unwrap());
        let input = Tensor::from_vec(1, 2, vec![0.5, -0.1]).unwrap();
        let trace = seq.forward_trace(&input).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[1], seq.forward(&input).unwrap());

        let grad_out = Tensor::from_vec(1, 2, vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            seq.backward_trace(&trace[..1], &grad_out),
            Err(TensorError::DataLength { expected: 2, got: 1 })
        ));
        assert_eq!(
            seq.backward_trace(&trace, &grad_out).unwrap().shape(),
            (1, 2)
        );
    }

    #[test]
    fn sequential_backward_reaches_every_layer() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut seq = Sequential::new();
        seq.push(Dense::new("l1", 2, 3, Activation::Identity, &mut rng).unwrap());
        seq.push(Dense::new("l2", 3, 1, Activation::Identity, &mut rng).unwrap());

        let input = Tensor::from_vec(1, 2, vec![0.5, -0.1]).unwrap();
        let grad_out = Tensor::from_vec(1, 1, vec![1.0]).unwrap();
        let grad_in = seq.backward(&input, &grad_out).unwrap();
        assert_eq!(grad_in.shape(), (1, 2));

        let mut with_grad = 0;
        seq.visit_parameters(&mut |param| {
            if param.gradient().is_some() {
                with_grad += 1;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(with_grad, 4);
        assert_eq!(seq.parameter_registry().unwrap().len(), 4);

        seq.zero_accumulators().unwrap();
        seq.visit_parameters(&mut |param| {
            assert!(param.gradient().is_none());
            Ok(())
        })
        .unwrap();
    }
}
