// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Fixed-rank matrix manifold used to train factored weights.
//!
//! Points are stored as a factor pair `X = U·V` with `U (m × r)` and
//! `V (r × n)`. Tangent vectors are kept in the compact form
//! `ξ = Qu·M·Qvᵀ + Up·Qvᵀ + Qu·Vpᵀ` where `Qu`/`Qv` are orthonormal bases of
//! the column/row spaces of `X`, `Upᵀ·Qu = 0` and `Vpᵀ·Qv = 0`. The
//! retraction is the truncated SVD of `X + t·ξ`, computed through the
//! `2r × 2r` core so no `m × n` matrix is formed.
//!
//! All decompositions run in `f64` via `nalgebra`; points enter and leave as
//! `f32` tensors.

use crate::factor::FactorPoint;
use crate::{PureResult, Tensor, TensorError};
use nalgebra::DMatrix;
use rf_tensor::linalg::{from_dmatrix, svd_sorted, thin_qr, to_dmatrix};

/// Default relative floor applied to retracted singular values.
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// The set of `rows × cols` matrices of rank `rank`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedRank {
    rows: usize,
    cols: usize,
    rank: usize,
    tolerance: f64,
}

/// Tangent vector at a point of [`FixedRank`], in factored form.
#[derive(Clone, Debug, PartialEq)]
pub struct TangentVector {
    pub qu: DMatrix<f64>,
    pub qv: DMatrix<f64>,
    pub m: DMatrix<f64>,
    pub up: DMatrix<f64>,
    pub vp: DMatrix<f64>,
}

impl TangentVector {
    /// Dense `m × n` form `Qu·M·Qvᵀ + Up·Qvᵀ + Qu·Vpᵀ`.
    pub fn to_ambient(&self) -> PureResult<Tensor> {
        let dense = &self.qu * &self.m * self.qv.transpose()
            + &self.up * self.qv.transpose()
            + &self.qu * self.vp.transpose();
        from_dmatrix(&dense)
    }

    /// Frobenius norm. The three components are mutually orthogonal.
    pub fn norm(&self) -> f64 {
        (self.m.norm_squared() + self.up.norm_squared() + self.vp.norm_squared()).sqrt()
    }

    pub fn scaled(&self, alpha: f64) -> Self {
        Self {
            qu: self.qu.clone(),
            qv: self.qv.clone(),
            m: &self.m * alpha,
            up: &self.up * alpha,
            vp: &self.vp * alpha,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.m
            .iter()
            .chain(self.up.iter())
            .chain(self.vp.iter())
            .all(|value| *value == 0.0)
    }
}

/// Condition encountered while retracting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarningKind {
    /// Some retained singular values fell below the floor and were raised to it.
    NearSingular,
    /// The candidate point was not finite; the original point was kept.
    NonFinite,
}

/// Recoverable numeric event reported by [`FixedRank::retract`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NumericWarning {
    pub kind: WarningKind,
    /// Smallest retained singular value before flooring (`NaN` when unknown).
    pub smallest: f64,
    /// Largest singular value (`NaN` when unknown).
    pub largest: f64,
}

/// Result of a retraction.
#[derive(Clone, Debug)]
pub struct Retraction {
    pub point: FactorPoint,
    pub warning: Option<NumericWarning>,
}

impl FixedRank {
    pub fn new(rows: usize, cols: usize, rank: usize) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let max = rows.min(cols);
        if rank == 0 || rank > max {
            return Err(TensorError::RankOutOfRange {
                rank,
                max,
                rows,
                cols,
            });
        }
        Ok(Self {
            rows,
            cols,
            rank,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Shapes of the `U` and `V` factors.
    pub fn factor_shapes(&self) -> [(usize, usize); 2] {
        [(self.rows, self.rank), (self.rank, self.cols)]
    }

    fn check_point(&self, point: &FactorPoint) -> PureResult<()> {
        let [u_shape, v_shape] = self.factor_shapes();
        if point.u.shape() != u_shape {
            return Err(TensorError::ShapeMismatch {
                left: point.u.shape(),
                right: u_shape,
            });
        }
        if point.v.shape() != v_shape {
            return Err(TensorError::ShapeMismatch {
                left: point.v.shape(),
                right: v_shape,
            });
        }
        for tensor in [&point.u, &point.v] {
            if let Some(&value) = tensor.data().iter().find(|value| !value.is_finite()) {
                return Err(TensorError::NonFiniteValue {
                    label: "manifold_point",
                    value,
                });
            }
        }
        Ok(())
    }

    /// Orthogonal projection of the ambient matrix `grad` onto the tangent
    /// space at `point`.
    pub fn project(&self, point: &FactorPoint, grad: &Tensor) -> PureResult<TangentVector> {
        self.check_point(point)?;
        if grad.shape() != (self.rows, self.cols) {
            return Err(TensorError::ShapeMismatch {
                left: grad.shape(),
                right: (self.rows, self.cols),
            });
        }
        let qu = thin_qr(to_dmatrix(&point.u)).q;
        let qv = thin_qr(to_dmatrix(&point.v).transpose()).q;
        let g = to_dmatrix(grad);

        let g_qv = &g * &qv;
        let gt_qu = g.transpose() * &qu;
        let m = qu.transpose() * &g_qv;
        let up = g_qv - &qu * &m;
        let vp = gt_qu - &qv * m.transpose();
        Ok(TangentVector { qu, qv, m, up, vp })
    }

    /// Maps `point + step_size · tangent` back onto the manifold.
    ///
    /// A zero step returns `point` unchanged. Singular values below
    /// `max(tolerance · σ_max, tolerance)` are floored and reported; a
    /// non-finite candidate is discarded in favour of `point`.
    pub fn retract(
        &self,
        point: &FactorPoint,
        tangent: &TangentVector,
        step_size: f64,
    ) -> PureResult<Retraction> {
        self.check_point(point)?;
        if step_size == 0.0 || tangent.is_zero() {
            return Ok(Retraction {
                point: point.clone(),
                warning: None,
            });
        }
        if !step_size.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "retraction_step",
                value: step_size as f32,
            });
        }
        let r = self.rank;
        let u = to_dmatrix(&point.u);
        let v = to_dmatrix(&point.v);
        let qu = &tangent.qu;
        let qv = &tangent.qv;

        // Core of X in the tangent's frame: X = Qu·S·Qvᵀ.
        let s = (qu.transpose() * &u) * (&v * qv);

        let mut k = DMatrix::<f64>::zeros(2 * r, 2 * r);
        let upper = s + &tangent.m * step_size;
        k.view_mut((0, 0), (r, r)).copy_from(&upper);
        for i in 0..r {
            k[(i, r + i)] = step_size;
            k[(r + i, i)] = step_size;
        }

        let left = thin_qr(concat_columns(qu, &tangent.up));
        let right = thin_qr(concat_columns(qv, &tangent.vp));
        let core = &left.r * k * right.r.transpose();
        if core.iter().any(|value| !value.is_finite()) {
            return Ok(non_finite_fallback(point));
        }

        let svd = svd_sorted(core)?;
        let mut sigma: Vec<f64> = svd.singular_values.iter().take(r).copied().collect();
        let largest = sigma.first().copied().unwrap_or(0.0);
        let smallest = sigma.last().copied().unwrap_or(0.0);
        let floor = (self.tolerance * largest).max(self.tolerance);
        let warning = if smallest < floor {
            for value in sigma.iter_mut() {
                *value = value.max(floor);
            }
            Some(NumericWarning {
                kind: WarningKind::NearSingular,
                smallest,
                largest,
            })
        } else {
            None
        };

        let root = DMatrix::from_diagonal(&nalgebra::DVector::from_iterator(
            r,
            sigma.iter().map(|value| value.sqrt()),
        ));
        let new_u = &left.q * svd.u.columns(0, r) * &root;
        let new_v = &root * svd.v_t.rows(0, r) * right.q.transpose();
        if new_u.iter().chain(new_v.iter()).any(|value| !value.is_finite()) {
            return Ok(non_finite_fallback(point));
        }
        let candidate = FactorPoint {
            u: from_dmatrix(&new_u)?,
            v: from_dmatrix(&new_v)?,
        };
        if !candidate.u.is_finite() || !candidate.v.is_finite() {
            return Ok(non_finite_fallback(point));
        }
        Ok(Retraction {
            point: candidate,
            warning,
        })
    }
}

fn concat_columns(left: &DMatrix<f64>, right: &DMatrix<f64>) -> DMatrix<f64> {
    let split = left.ncols();
    DMatrix::from_fn(left.nrows(), split + right.ncols(), |row, col| {
        if col < split {
            left[(row, col)]
        } else {
            right[(row, col - split)]
        }
    })
}

fn non_finite_fallback(point: &FactorPoint) -> Retraction {
    Retraction {
        point: point.clone(),
        warning: Some(NumericWarning {
            kind: WarningKind::NonFinite,
            smallest: f64::NAN,
            largest: f64::NAN,
        }),
    }
}

/// Binds a group of parameters to one manifold instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ManifoldDescriptor {
    name: String,
    manifold: FixedRank,
    members: [String; 2],
}

impl ManifoldDescriptor {
    /// `members` names the `U` and `V` parameters, in that order.
    pub fn new(name: impl Into<String>, manifold: FixedRank, members: Vec<String>) -> PureResult<Self> {
        let members: [String; 2] = members
            .try_into()
            .map_err(|_| TensorError::InvalidValue {
                label: "manifold_members",
            })?;
        Ok(Self {
            name: name.into(),
            manifold,
            members,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifold(&self) -> &FixedRank {
        &self.manifold
    }

    pub fn members(&self) -> &[String; 2] {
        &self.members
    }

    /// Expected shape of each member, aligned with [`Self::members`].
    pub fn member_shapes(&self) -> [(usize, usize); 2] {
        self.manifold.factor_shapes()
    }

    pub fn project(&self, point: &FactorPoint, grad: &Tensor) -> PureResult<TangentVector> {
        self.manifold.project(point, grad)
    }

    pub fn retract(
        &self,
        point: &FactorPoint,
        tangent: &TangentVector,
        step_size: f64,
    ) -> PureResult<Retraction> {
        self.manifold.retract(point, tangent, step_size)
    }
}

/// Ordered collection of manifold descriptors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ManifoldRegistry {
    groups: Vec<ManifoldDescriptor>,
}

impl ManifoldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a descriptor. Group names must be unique.
    pub fn register(&mut self, descriptor: ManifoldDescriptor) -> PureResult<()> {
        if self.contains(descriptor.name()) {
            return Err(TensorError::InvalidValue {
                label: "duplicate_manifold_name",
            });
        }
        self.groups.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ManifoldDescriptor> {
        self.groups.iter().find(|group| group.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifoldDescriptor> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// First group declaring `parameter`, with the member slot it occupies.
    pub fn group_of(&self, parameter: &str) -> Option<(&ManifoldDescriptor, usize)> {
        self.groups.iter().find_map(|group| {
            group
                .members()
                .iter()
                .position(|member| member == parameter)
                .map(|slot| (group, slot))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rf_tensor::linalg;

    fn random_point(rows: usize, cols: usize, rank: usize, seed: u64) -> FactorPoint {
        let mut rng = StdRng::seed_from_u64(seed);
        FactorPoint {
            u: Tensor::random_normal(rows, rank, 0.0, 1.0, &mut rng).unwrap(),
            v: Tensor::random_normal(rank, cols, 0.0, 1.0, &mut rng).unwrap(),
        }
    }

    fn random_grad(rows: usize, cols: usize, seed: u64) -> Tensor {
        let mut rng = StdRng::seed_from_u64(seed);
        Tensor::random_normal(rows, cols, 0.0, 1.0, &mut rng).unwrap()
    }

    #[test]
    fn projection_is_idempotent() {
        let manifold = FixedRank::new(7, 5, 2).unwrap();
        let point = random_point(7, 5, 2, 1);
        let once = manifold
            .project(&point, &random_grad(7, 5, 2))
            .unwrap()
            .to_ambient()
            .unwrap();
        let twice = manifold.project(&point, &once).unwrap().to_ambient().unwrap();
        assert!(once.max_abs_diff(&twice).unwrap() < 1e-4);
    }

    #[test]
    fn tangent_components_are_orthogonal_to_the_frame() {
        let manifold = FixedRank::new(6, 6, 3).unwrap();
        let tangent = manifold
            .project(&random_point(6, 6, 3, 3), &random_grad(6, 6, 4))
            .unwrap();
        assert!((tangent.up.transpose() * &tangent.qu).amax() < 1e-9);
        assert!((tangent.vp.transpose() * &tangent.qv).amax() < 1e-9);
        assert!(linalg::orthonormality_error(&tangent.qu) < 1e-9);
        let dense = tangent.to_ambient().unwrap();
        let norm = (dense.squared_l2_norm() as f64).sqrt();
        assert!((norm - tangent.norm()).abs() < 1e-3 * tangent.norm().max(1.0));
    }

    #[test]
    fn retraction_keeps_rank_and_shapes() {
        let manifold = FixedRank::new(6, 5, 2).unwrap();
        let point = random_point(6, 5, 2, 5);
        let tangent = manifold.project(&point, &random_grad(6, 5, 6)).unwrap();
        let retraction = manifold.retract(&point, &tangent, 0.1).unwrap();
        assert!(retraction.warning.is_none());
        assert_eq!(retraction.point.u.shape(), (6, 2));
        assert_eq!(retraction.point.v.shape(), (2, 5));
        let product = retraction.point.product().unwrap();
        assert!(linalg::numerical_rank(&product, 1e-5).unwrap() <= 2);
    }

    #[test]
    fn small_steps_follow_the_tangent() {
        let manifold = FixedRank::new(6, 5, 2).unwrap();
        let point = random_point(6, 5, 2, 7);
        let tangent = manifold.project(&point, &random_grad(6, 5, 8)).unwrap();
        let t = 1e-3;
        let retracted = manifold.retract(&point, &tangent, t).unwrap().point;

        let mut linear = point.product().unwrap();
        linear
            .add_scaled(&tangent.to_ambient().unwrap(), t as f32)
            .unwrap();
        let diff = retracted.product().unwrap().max_abs_diff(&linear).unwrap();
        assert!(diff < 1e-3, "retraction drifted by {diff}");
    }

    #[test]
    fn zero_step_is_identity() {
        let manifold = FixedRank::new(4, 4, 2).unwrap();
        let point = random_point(4, 4, 2, 9);
        let tangent = manifold.project(&point, &random_grad(4, 4, 10)).unwrap();
        let retraction = manifold.retract(&point, &tangent, 0.0).unwrap();
        assert_eq!(retraction.point, point);

        let zero = manifold.project(&point, &Tensor::zeros(4, 4).unwrap()).unwrap();
        assert!(zero.is_zero());
        assert_eq!(manifold.retract(&point, &zero, 0.5).unwrap().point, point);
    }

    #[test]
    fn collapsed_directions_are_floored_and_reported() {
        let manifold = FixedRank::new(4, 3, 2).unwrap();
        let point = FactorPoint {
            u: Tensor::from_vec(4, 2, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap(),
            v: Tensor::from_vec(2, 3, vec![2.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap(),
        };
        let grad = Tensor::from_fn(4, 3, |r, c| if r == 0 && c == 0 { 1.0 } else { 0.0 }).unwrap();
        let tangent = manifold.project(&point, &grad).unwrap();
        let retraction = manifold.retract(&point, &tangent, 0.5).unwrap();

        let warning = retraction.warning.expect("near-singular warning");
        assert_eq!(warning.kind, WarningKind::NearSingular);
        assert!(retraction.point.u.is_finite() && retraction.point.v.is_finite());
        let product = retraction.point.product().unwrap();
        assert!((product.get(0, 0) - 2.5).abs() < 1e-4);
        assert!(linalg::numerical_rank(&product, 1e-3).unwrap() == 1);
    }

    #[test]
    fn non_finite_points_are_rejected() {
        let manifold = FixedRank::new(3, 3, 1).unwrap();
        let mut point = random_point(3, 3, 1, 11);
        point.u.data_mut()[0] = f32::NAN;
        let err = manifold.project(&point, &Tensor::zeros(3, 3).unwrap()).unwrap_err();
        assert!(matches!(err, TensorError::NonFiniteValue { .. }));
    }

    #[test]
    fn registry_resolves_groups_by_member() {
        let manifold = FixedRank::new(8, 4, 2).unwrap();
        let mut registry = ManifoldRegistry::new();
        registry
            .register(
                ManifoldDescriptor::new(
                    "fixedrank0",
                    manifold,
                    vec!["fixedrank0::u".into(), "fixedrank0::v".into()],
                )
                .unwrap(),
            )
            .unwrap();
        let (group, slot) = registry.group_of("fixedrank0::v").unwrap();
        assert_eq!(group.name(), "fixedrank0");
        assert_eq!(slot, 1);
        assert!(registry.group_of("output::weight").is_none());

        let again = ManifoldDescriptor::new("fixedrank0", manifold, vec!["a".into(), "b".into()]).unwrap();
        assert!(registry.register(again).is_err());
        assert!(ManifoldDescriptor::new("solo", manifold, vec!["a".into()]).is_err());
    }
}
