// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Bridges between [`Tensor`] and `nalgebra` plus the thin QR / sorted SVD
//! helpers used by the fixed-rank manifold. Decompositions run in `f64`.

use crate::pure::{PureResult, Tensor, TensorError};
use nalgebra::DMatrix;
use std::cmp::Ordering;

/// Copies a tensor into a column-major `nalgebra` matrix.
pub fn to_dmatrix(tensor: &Tensor) -> DMatrix<f64> {
    let (rows, cols) = tensor.shape();
    DMatrix::from_fn(rows, cols, |r, c| tensor.get(r, c) as f64)
}

/// Copies an `nalgebra` matrix back into a row-major tensor.
pub fn from_dmatrix(matrix: &DMatrix<f64>) -> PureResult<Tensor> {
    Tensor::from_fn(matrix.nrows(), matrix.ncols(), |r, c| matrix[(r, c)] as f32)
}

/// Thin QR factors: `q` is `m × min(m, n)` with orthonormal columns and `r`
/// is `min(m, n) × n` upper triangular.
#[derive(Clone, Debug)]
pub struct ThinQr {
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
}

/// Householder QR of `matrix`.
pub fn thin_qr(matrix: DMatrix<f64>) -> ThinQr {
    let qr = matrix.qr();
    ThinQr {
        q: qr.q(),
        r: qr.r(),
    }
}

/// Singular value decomposition with singular values in descending order.
#[derive(Clone, Debug)]
pub struct SortedSvd {
    pub u: DMatrix<f64>,
    pub singular_values: Vec<f64>,
    pub v_t: DMatrix<f64>,
}

/// Computes a full thin SVD and sorts the triplets by decreasing singular
/// value.
pub fn svd_sorted(matrix: DMatrix<f64>) -> PureResult<SortedSvd> {
    let svd = matrix
        .try_svd(true, true, f64::EPSILON, 0)
        .ok_or(TensorError::Decomposition { operation: "svd" })?;
    let u = svd
        .u
        .ok_or(TensorError::Decomposition { operation: "svd(u)" })?;
    let v_t = svd
        .v_t
        .ok_or(TensorError::Decomposition { operation: "svd(v_t)" })?;
    let values: Vec<f64> = svd.singular_values.iter().copied().collect();

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));

    Ok(SortedSvd {
        u: DMatrix::from_fn(u.nrows(), order.len(), |r, c| u[(r, order[c])]),
        singular_values: order.iter().map(|&idx| values[idx]).collect(),
        v_t: DMatrix::from_fn(order.len(), v_t.ncols(), |r, c| v_t[(order[r], c)]),
    })
}

/// Singular values of a tensor in descending order.
fn singular_values(tensor: &Tensor) -> PureResult<Vec<f64>> {
    let svd = to_dmatrix(tensor)
        .try_svd(false, false, f64::EPSILON, 0)
        .ok_or(TensorError::Decomposition {
            operation: "singular_values",
        })?;
    let mut values: Vec<f64> = svd.singular_values.iter().copied().collect();
    values.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    Ok(values)
}

/// Number of singular values above `relative_tolerance * σ_max`.
pub fn numerical_rank(tensor: &Tensor, relative_tolerance: f64) -> PureResult<usize> {
    let values = singular_values(tensor)?;
    let Some(&largest) = values.first() else {
        return Ok(0);
    };
    if largest == 0.0 {
        return Ok(0);
    }
    Ok(values
        .iter()
        .filter(|&&value| value > relative_tolerance * largest)
        .count())
}

/// Largest entry of `|QᵀQ − I|`.
pub fn orthonormality_error(q: &DMatrix<f64>) -> f64 {
    let gram = q.transpose() * q;
    let mut worst = 0.0f64;
    for r in 0..gram.nrows() {
        for c in 0..gram.ncols() {
            let target = if r == c { 1.0 } else { 0.0 };
            worst = worst.max((gram[(r, c)] - target).abs());
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn round_trip_preserves_layout() {
        let t = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let m = to_dmatrix(&t);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(from_dmatrix(&m).unwrap(), t);
    }

    #[test]
    fn thin_qr_reconstructs_tall_matrix() {
        let mut rng = StdRng::seed_from_u64(3);
        let t = Tensor::random_normal(7, 3, 0.0, 1.0, &mut rng).unwrap();
        let m = to_dmatrix(&t);
        let ThinQr { q, r } = thin_qr(m.clone());
        assert_eq!(q.shape(), (7, 3));
        assert_eq!(r.shape(), (3, 3));
        assert!(orthonormality_error(&q) < 1e-12);
        assert!((q * r - m).amax() < 1e-12);
    }

    #[test]
    fn svd_is_sorted_and_reconstructs() {
        let t = Tensor::from_vec(3, 3, vec![1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 3.0]).unwrap();
        let svd = svd_sorted(to_dmatrix(&t)).unwrap();
        assert_relative_eq!(svd.singular_values[0], 5.0, epsilon = 1e-12);
        assert_relative_eq!(svd.singular_values[1], 3.0, epsilon = 1e-12);
        assert_relative_eq!(svd.singular_values[2], 1.0, epsilon = 1e-12);
        let sigma = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(
            svd.singular_values.clone(),
        ));
        let rebuilt = &svd.u * sigma * &svd.v_t;
        assert!((rebuilt - to_dmatrix(&t)).amax() < 1e-12);
    }

    #[test]
    fn numerical_rank_counts_outer_products() {
        let u = Tensor::from_vec(4, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let v = Tensor::from_vec(1, 3, vec![1.0, -1.0, 0.5]).unwrap();
        let rank_one = u.matmul(&v).unwrap();
        assert_eq!(numerical_rank(&rank_one, 1e-5).unwrap(), 1);
        assert_eq!(numerical_rank(&Tensor::eye(3).unwrap(), 1e-5).unwrap(), 3);
        assert_eq!(numerical_rank(&Tensor::zeros(2, 2).unwrap(), 1e-5).unwrap(), 0);
    }
}
