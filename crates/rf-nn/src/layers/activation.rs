// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, Tensor, TensorError};
use serde::{Deserialize, Serialize};

/// Nonlinearity fused into the dense-style layers.
///
/// `backward` receives the pre-activation `z` (not the output) so layers only
/// need to keep their input around.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Identity,
    Rectify,
    Softmax,
}

impl Activation {
    pub fn forward(&self, pre: &Tensor) -> PureResult<Tensor> {
        match self {
            Activation::Identity => Ok(pre.clone()),
            Activation::Rectify => {
                let mut out = pre.clone();
                out.relu_inplace();
                Ok(out)
            }
            Activation::Softmax => pre.row_softmax(),
        }
    }

    /// Maps `∂L/∂a` to `∂L/∂z` given the pre-activation `z`.
    pub fn backward(&self, pre: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if pre.shape() != grad_output.shape() {
            return Err(TensorError::ShapeMismatch {
                left: pre.shape(),
                right: grad_output.shape(),
            });
        }
        match self {
            Activation::Identity => Ok(grad_output.clone()),
            Activation::Rectify => {
                let (rows, cols) = pre.shape();
                let mut data = Vec::with_capacity(rows * cols);
                for (z, grad) in pre.data().iter().zip(grad_output.data().iter()) {
                    data.push(if *z > 0.0 { *grad } else { 0.0 });
                }
                Tensor::from_vec(rows, cols, data)
            }
            Activation::Softmax => {
                let probs = pre.row_softmax()?;
                let (rows, cols) = probs.shape();
                let mut data = Vec::with_capacity(rows * cols);
                for row in 0..rows {
                    let s = probs.row(row);
                    let g = grad_output.row(row);
                    let dot: f32 = s.iter().zip(g.iter()).map(|(s, g)| s * g).sum();
                    data.extend(s.iter().zip(g.iter()).map(|(s, g)| s * (g - dot)));
                }
                Tensor::from_vec(rows, cols, data)
            }
        }
    }
}
