// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Structured parameterizations of a dense weight.
//!
//! A [`FactorSet`] owns the tensors that jointly reconstruct one logical
//! `d_in × d_out` weight. Low-rank sets store `W = U·V`; Kronecker sets store
//! `W = Σ_k A_k ⊗ B_k` through the rearranged product `R(W) = U·V` (see
//! [`rf_tensor::kron`]). Both expose their `(U, V)` pair as a [`FactorPoint`]
//! on a fixed-rank manifold so the optimizer can retract jointly.

use crate::manifold::{FixedRank, ManifoldDescriptor};
use crate::module::Parameter;
use crate::{PureResult, Tensor, TensorError};
use rand::Rng;
use rf_tensor::KronShape;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::str::FromStr;

/// Rank used when neither `rank` nor `param_density` is configured.
pub const DEFAULT_RANK: usize = 10;

/// Kronecker block shape used when none is configured.
pub const DEFAULT_SHAPE2: (usize, usize) = (4, 4);

/// Layer type selector accepted by network construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LayerKind {
    #[default]
    Dense,
    LowRank,
    Kron,
    UvKron,
}

impl LayerKind {
    /// Canonical tag of the variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Dense => "dense",
            LayerKind::LowRank => "lowrank",
            LayerKind::Kron => "kron",
            LayerKind::UvKron => "uv_kron",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = TensorError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "dense" => Ok(LayerKind::Dense),
            "lowrank" => Ok(LayerKind::LowRank),
            "kron" => Ok(LayerKind::Kron),
            "uv_kron" => Ok(LayerKind::UvKron),
            other => Err(TensorError::UnknownLayerType {
                tag: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for LayerKind {
    type Error = TensorError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<LayerKind> for String {
    fn from(kind: LayerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Factorization options shared by the structured layer variants.
///
/// Precedence: `use_rank = false` bypasses factorization entirely, otherwise
/// an explicit `rank` wins over `param_density`, and [`DEFAULT_RANK`] applies
/// when neither is set.
///
/// `use_rank` is only the full-rank ablation switch. It does not choose
/// between `rank` and `param_density`; a configured density is honoured only
/// while `rank` is unset, whatever `use_rank` says.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorConfig {
    pub rank: Option<usize>,
    pub use_rank: bool,
    pub param_density: Option<f32>,
    pub shape2: (usize, usize),
}

impl Default for FactorConfig {
    fn default() -> Self {
        Self {
            rank: None,
            use_rank: true,
            param_density: None,
            shape2: DEFAULT_SHAPE2,
        }
    }
}

impl FactorConfig {
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.param_density = Some(density);
        self
    }

    pub fn with_shape2(mut self, shape2: (usize, usize)) -> Self {
        self.shape2 = shape2;
        self
    }

    /// Ablation switch: keep the full dense weight.
    pub fn full_rank(mut self) -> Self {
        self.use_rank = false;
        self
    }
}

/// Outcome of rank resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankChoice {
    Full,
    Rank(usize),
}

/// Resolves the factor rank of a `rows × cols` factorization.
///
/// A density `d` maps to `round(d · rows · cols / (rows + cols))`, the rank
/// whose `U`/`V` pair holds `d` times the dense parameter count.
pub fn resolve_rank(rows: usize, cols: usize, config: &FactorConfig) -> PureResult<RankChoice> {
    if rows == 0 || cols == 0 {
        return Err(TensorError::InvalidDimensions { rows, cols });
    }
    if !config.use_rank {
        return Ok(RankChoice::Full);
    }
    let max = rows.min(cols);
    let rank = match (config.rank, config.param_density) {
        (Some(rank), _) => rank,
        (None, Some(density)) => {
            if !density.is_finite() {
                return Err(TensorError::NonFiniteValue {
                    label: "param_density",
                    value: density,
                });
            }
            let raw = (density as f64) * (rows * cols) as f64 / (rows + cols) as f64;
            let rank = raw.round();
            if rank < 1.0 {
                return Err(TensorError::DensityTooSmall {
                    density,
                    rows,
                    cols,
                });
            }
            rank as usize
        }
        (None, None) => DEFAULT_RANK,
    };
    if rank == 0 || rank > max {
        return Err(TensorError::RankOutOfRange {
            rank,
            max,
            rows,
            cols,
        });
    }
    Ok(RankChoice::Rank(rank))
}

/// Glorot-uniform tensor scaled to its own fan-in/fan-out.
pub fn glorot_uniform<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> PureResult<Tensor> {
    let limit = (6.0 / (rows + cols) as f32).sqrt();
    Tensor::random_uniform(rows, cols, -limit, limit, rng)
}

/// Structure of a factor set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Factorization {
    /// Unfactorized dense weight.
    Full,
    /// `W = U·V`.
    LowRank { rank: usize },
    /// `W = R⁻¹(U·V)`, manifold-constrained.
    Kronecker { rank: usize, layout: KronShape },
    /// `W = R⁻¹(U·V)` with unconstrained Euclidean factors.
    UvKronecker { rank: usize, layout: KronShape },
}

/// Value of a factored point: `U (m × r)` and `V (r × n)`.
#[derive(Clone, Debug, PartialEq)]
pub struct FactorPoint {
    pub u: Tensor,
    pub v: Tensor,
}

impl FactorPoint {
    pub fn new(u: Tensor, v: Tensor) -> PureResult<Self> {
        if u.shape().1 != v.shape().0 {
            return Err(TensorError::ShapeMismatch {
                left: u.shape(),
                right: v.shape(),
            });
        }
        Ok(Self { u, v })
    }

    /// Inner dimension `r`.
    pub fn rank(&self) -> usize {
        self.u.shape().1
    }

    /// `U·V`.
    pub fn product(&self) -> PureResult<Tensor> {
        self.u.matmul(&self.v)
    }
}

/// Owned decomposition of one logical weight matrix.
#[derive(Debug)]
pub struct FactorSet {
    name: String,
    shape: (usize, usize),
    factorization: Factorization,
    factors: Vec<Parameter>,
    ambient: Option<Tensor>,
    reconstructions: Cell<usize>,
}

impl FactorSet {
    /// Builds the factor set a `kind` layer needs for a `d_in × d_out` weight.
    pub fn from_config<R: Rng + ?Sized>(
        name: impl Into<String>,
        d_in: usize,
        d_out: usize,
        kind: LayerKind,
        config: &FactorConfig,
        rng: &mut R,
    ) -> PureResult<Self> {
        let name = name.into();
        if kind == LayerKind::Dense || !config.use_rank {
            return Self::full(name, d_in, d_out, rng);
        }
        match kind {
            LayerKind::LowRank => match resolve_rank(d_in, d_out, config)? {
                RankChoice::Rank(rank) => Self::low_rank(name, d_in, d_out, rank, rng),
                RankChoice::Full => Self::full(name, d_in, d_out, rng),
            },
            LayerKind::Kron | LayerKind::UvKron => {
                let layout = KronShape::new((d_in, d_out), config.shape2)?;
                let (rows, cols) = layout.rearranged_shape();
                let rank = match resolve_rank(rows, cols, config)? {
                    RankChoice::Rank(rank) => rank,
                    RankChoice::Full => return Self::full(name, d_in, d_out, rng),
                };
                if kind == LayerKind::Kron {
                    Self::kronecker(name, layout, rank, rng)
                } else {
                    Self::uv_kronecker(name, layout, rank, rng)
                }
            }
            LayerKind::Dense => Self::full(name, d_in, d_out, rng),
        }
    }

    /// Dense, unconstrained weight.
    pub fn full<R: Rng + ?Sized>(
        name: impl Into<String>,
        d_in: usize,
        d_out: usize,
        rng: &mut R,
    ) -> PureResult<Self> {
        let name = name.into();
        let weight = glorot_uniform(d_in, d_out, rng)?;
        Ok(Self {
            factors: vec![Parameter::new(format!("{name}::weight"), weight)],
            name,
            shape: (d_in, d_out),
            factorization: Factorization::Full,
            ambient: None,
            reconstructions: Cell::new(0),
        })
    }

    /// `W = U·V` with `U (d_in × rank)` and `V (rank × d_out)`.
    pub fn low_rank<R: Rng + ?Sized>(
        name: impl Into<String>,
        d_in: usize,
        d_out: usize,
        rank: usize,
        rng: &mut R,
    ) -> PureResult<Self> {
        check_rank(rank, d_in, d_out)?;
        Self::with_uv(
            name.into(),
            (d_in, d_out),
            (d_in, d_out),
            rank,
            Factorization::LowRank { rank },
            rng,
        )
    }

    /// Kronecker sum of `rank` terms, manifold-constrained.
    pub fn kronecker<R: Rng + ?Sized>(
        name: impl Into<String>,
        layout: KronShape,
        rank: usize,
        rng: &mut R,
    ) -> PureResult<Self> {
        let (rows, cols) = layout.rearranged_shape();
        check_rank(rank, rows, cols)?;
        Self::with_uv(
            name.into(),
            layout.shape(),
            (rows, cols),
            rank,
            Factorization::Kronecker { rank, layout },
            rng,
        )
    }

    /// Kronecker sum of `rank` terms read off Euclidean `U`/`V` factors.
    pub fn uv_kronecker<R: Rng + ?Sized>(
        name: impl Into<String>,
        layout: KronShape,
        rank: usize,
        rng: &mut R,
    ) -> PureResult<Self> {
        let (rows, cols) = layout.rearranged_shape();
        check_rank(rank, rows, cols)?;
        Self::with_uv(
            name.into(),
            layout.shape(),
            (rows, cols),
            rank,
            Factorization::UvKronecker { rank, layout },
            rng,
        )
    }

    fn with_uv<R: Rng + ?Sized>(
        name: String,
        shape: (usize, usize),
        coords: (usize, usize),
        rank: usize,
        factorization: Factorization,
        rng: &mut R,
    ) -> PureResult<Self> {
        let u = glorot_uniform(coords.0, rank, rng)?;
        let v = glorot_uniform(rank, coords.1, rng)?;
        Ok(Self {
            factors: vec![
                Parameter::new(format!("{name}::u"), u),
                Parameter::new(format!("{name}::v"), v),
            ],
            name,
            shape,
            factorization,
            ambient: None,
            reconstructions: Cell::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shape of the effective weight.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn factorization(&self) -> Factorization {
        self.factorization
    }

    /// Factor rank, `None` for the full weight.
    pub fn rank(&self) -> Option<usize> {
        match self.factorization {
            Factorization::Full => None,
            Factorization::LowRank { rank }
            | Factorization::Kronecker { rank, .. }
            | Factorization::UvKronecker { rank, .. } => Some(rank),
        }
    }

    /// Shape of the matrix `U·V` represents (the weight itself for low-rank
    /// sets, its rearrangement for Kronecker sets).
    pub fn coordinate_shape(&self) -> (usize, usize) {
        match self.factorization {
            Factorization::Full | Factorization::LowRank { .. } => self.shape,
            Factorization::Kronecker { layout, .. } | Factorization::UvKronecker { layout, .. } => {
                layout.rearranged_shape()
            }
        }
    }

    /// Whether updates must go through a manifold retraction.
    pub fn is_manifold_constrained(&self) -> bool {
        matches!(
            self.factorization,
            Factorization::LowRank { .. } | Factorization::Kronecker { .. }
        )
    }

    /// Descriptor binding this set to its fixed-rank manifold.
    pub fn manifold(&self) -> PureResult<Option<ManifoldDescriptor>> {
        if !self.is_manifold_constrained() {
            return Ok(None);
        }
        let (rows, cols) = self.coordinate_shape();
        let rank = self.rank().unwrap_or_default();
        let manifold = FixedRank::new(rows, cols, rank)?;
        let members = self
            .factors
            .iter()
            .map(|param| param.name().to_string())
            .collect();
        Ok(Some(ManifoldDescriptor::new(
            self.name.clone(),
            manifold,
            members,
        )?))
    }

    /// Learnable tensors in stable order (`weight`, or `u` then `v`).
    pub fn factors(&self) -> &[Parameter] {
        &self.factors
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for param in &self.factors {
            visitor(param)?;
        }
        Ok(())
    }

    pub fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for param in &mut self.factors {
            visitor(param)?;
        }
        Ok(())
    }

    /// Number of scalars held by the factors.
    pub fn parameter_count(&self) -> usize {
        self.factors.iter().map(|param| param.value().len()).sum()
    }

    /// Current `(U, V)` pair; `None` for the full weight.
    pub fn point(&self) -> Option<FactorPoint> {
        match self.factors.as_slice() {
            [u, v] => Some(FactorPoint {
                u: u.value().clone(),
                v: v.value().clone(),
            }),
            _ => None,
        }
    }

    /// Overwrites the `(U, V)` pair.
    pub fn load_point(&mut self, point: &FactorPoint) -> PureResult<()> {
        match self.factors.as_mut_slice() {
            [u, v] => {
                u.load_value(&point.u)?;
                v.load_value(&point.v)
            }
            _ => Err(TensorError::InvalidValue {
                label: "factor_set_without_point",
            }),
        }
    }

    /// Reconstructs the effective `d_in × d_out` weight.
    pub fn effective_weight(&self) -> PureResult<Tensor> {
        self.reconstructions.set(self.reconstructions.get() + 1);
        match (self.factorization, self.factors.as_slice()) {
            (Factorization::Full, [weight]) => Ok(weight.value().clone()),
            (Factorization::LowRank { .. }, [u, v]) => u.value().matmul(v.value()),
            (Factorization::Kronecker { layout, .. }, [u, v])
            | (Factorization::UvKronecker { layout, .. }, [u, v]) => {
                layout.unrearrange(&u.value().matmul(v.value())?)
            }
            _ => Err(TensorError::InvalidValue {
                label: "factor_set_layout",
            }),
        }
    }

    /// Maps `∂L/∂W` to factor gradients and, for manifold-constrained sets,
    /// caches the gradient in manifold coordinates for the optimizer.
    pub fn backprop(&mut self, grad_weight: &Tensor) -> PureResult<()> {
        if grad_weight.shape() != self.shape {
            return Err(TensorError::ShapeMismatch {
                left: grad_weight.shape(),
                right: self.shape,
            });
        }
        let coords = match self.factorization {
            Factorization::Full => {
                return match self.factors.as_mut_slice() {
                    [weight] => weight.accumulate_euclidean(grad_weight),
                    _ => Err(TensorError::InvalidValue {
                        label: "factor_set_layout",
                    }),
                };
            }
            Factorization::LowRank { .. } => grad_weight.clone(),
            Factorization::Kronecker { layout, .. } | Factorization::UvKronecker { layout, .. } => {
                layout.rearrange(grad_weight)?
            }
        };
        let constrained = self.is_manifold_constrained();
        let [u, v] = self.factors.as_mut_slice() else {
            return Err(TensorError::InvalidValue {
                label: "factor_set_layout",
            });
        };
        let grad_u = coords.matmul(&v.value().transpose())?;
        let grad_v = u.value().transpose().matmul(&coords)?;
        u.accumulate_euclidean(&grad_u)?;
        v.accumulate_euclidean(&grad_v)?;
        if constrained {
            match self.ambient.as_mut() {
                Some(existing) => existing.add_scaled(&coords, 1.0)?,
                None => self.ambient = Some(coords),
            }
        }
        Ok(())
    }

    /// How many times [`FactorSet::effective_weight`] has run.
    pub fn reconstruction_count(&self) -> usize {
        self.reconstructions.get()
    }

    /// Accumulated `∂L/∂(U·V)` of a manifold-constrained set.
    pub fn ambient_gradient(&self) -> Option<&Tensor> {
        self.ambient.as_ref()
    }

    pub fn clear_ambient(&mut self) {
        self.ambient = None;
    }
}

fn check_rank(rank: usize, rows: usize, cols: usize) -> PureResult<()> {
    let max = rows.min(cols);
    if rank == 0 || rank > max {
        return Err(TensorError::RankOutOfRange {
            rank,
            max,
            rows,
            cols,
        });
    }
    Ok(())
}
