// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Kronecker products and the Van Loan rearrangement.
//!
//! For a weight of shape `(m1·p, n1·q)` split into `shape1 = (m1, n1)` blocks
//! of `shape2 = (p, q)`, the rearrangement `R` maps
//!
//! ```text
//! W[i·p + a, j·q + b]  ↦  R(W)[i·n1 + j, a·q + b]
//! ```
//!
//! so that `R(A ⊗ B) = vec(A) · vec(B)ᵀ` with row-major `vec`. A sum of `r`
//! Kronecker products is therefore a rank-`r` matrix after rearrangement.

use crate::pure::{PureResult, Tensor, TensorError};

/// Kronecker product `a ⊗ b`.
pub fn kron(a: &Tensor, b: &Tensor) -> PureResult<Tensor> {
    let (ma, na) = a.shape();
    let (mb, nb) = b.shape();
    Tensor::from_fn(ma * mb, na * nb, |r, c| {
        a.get(r / mb, c / nb) * b.get(r % mb, c % nb)
    })
}

/// Block geometry of a Kronecker-factored weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KronShape {
    shape: (usize, usize),
    shape1: (usize, usize),
    shape2: (usize, usize),
}

impl KronShape {
    /// Splits `shape` into `shape2`-sized blocks. Fails when `shape2` has a
    /// zero axis or does not divide `shape` exactly.
    pub fn new(shape: (usize, usize), shape2: (usize, usize)) -> PureResult<Self> {
        let (rows, cols) = shape;
        let (p, q) = shape2;
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if p == 0 || q == 0 || rows % p != 0 || cols % q != 0 {
            return Err(TensorError::KroneckerIndivisible { shape, shape2 });
        }
        Ok(Self {
            shape,
            shape1: (rows / p, cols / q),
            shape2,
        })
    }

    /// Shape of the full weight.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Shape of the large factor `A_k`.
    pub fn shape1(&self) -> (usize, usize) {
        self.shape1
    }

    /// Shape of the small factor `B_k`.
    pub fn shape2(&self) -> (usize, usize) {
        self.shape2
    }

    /// Shape of `R(W)`: `(m1·n1, p·q)`.
    pub fn rearranged_shape(&self) -> (usize, usize) {
        (
            self.shape1.0 * self.shape1.1,
            self.shape2.0 * self.shape2.1,
        )
    }

    /// Applies `R` to a full-shape tensor.
    pub fn rearrange(&self, weight: &Tensor) -> PureResult<Tensor> {
        if weight.shape() != self.shape {
            return Err(TensorError::ShapeMismatch {
                left: weight.shape(),
                right: self.shape,
            });
        }
        let (_, n1) = self.shape1;
        let (p, q) = self.shape2;
        let (rows, cols) = self.rearranged_shape();
        Tensor::from_fn(rows, cols, |row, col| {
            let (i, j) = (row / n1, row % n1);
            let (a, b) = (col / q, col % q);
            weight.get(i * p + a, j * q + b)
        })
    }

    /// Inverse of [`KronShape::rearrange`].
    pub fn unrearrange(&self, rearranged: &Tensor) -> PureResult<Tensor> {
        if rearranged.shape() != self.rearranged_shape() {
            return Err(TensorError::ShapeMismatch {
                left: rearranged.shape(),
                right: self.rearranged_shape(),
            });
        }
        let (_, n1) = self.shape1;
        let (p, q) = self.shape2;
        let (rows, cols) = self.shape;
        Tensor::from_fn(rows, cols, |row, col| {
            let (i, a) = (row / p, row % p);
            let (j, b) = (col / q, col % q);
            rearranged.get(i * n1 + j, a * q + b)
        })
    }
}
