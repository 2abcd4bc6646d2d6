// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pure Rust 2D tensor and the crate-wide error type.

use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Result alias used throughout the workspace.
pub type PureResult<T> = Result<T, TensorError>;

/// Work volume (`rows * inner * cols`) above which matmul fans rows out over
/// the rayon pool. Each output row is owned by one task so the result does not
/// depend on scheduling.
const PARALLEL_MATMUL_VOLUME: usize = 1 << 18;

/// Errors emitted by tensors, factor sets, layers and the optimizer.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    #[error("invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero")]
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor or operator does not match the tensor shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Computation received an empty input which would otherwise trigger a panic.
    #[error("empty input passed to {0}")]
    EmptyInput(&'static str),
    /// Numeric guard detected a non-finite value that would otherwise propagate NaNs.
    #[error("non-finite value {value} detected for {label}")]
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    #[error("invalid value for {label}")]
    InvalidValue { label: &'static str },
    /// Learning rates must be finite and non-negative.
    #[error("learning rate {rate} must be finite and non-negative")]
    InvalidLearningRate { rate: f32 },
    /// Attempted to load or update a parameter that was not registered.
    #[error("parameter `{name}` is missing")]
    MissingParameter { name: String },
    /// Layer type tags must be one of the known variants.
    #[error("unknown layer type `{tag}`; expected one of dense, lowrank, kron, uv_kron")]
    UnknownLayerType { tag: String },
    /// The factor rank violates `1 <= rank <= max`.
    #[error("rank {rank} is outside 1..={max} for a {rows} x {cols} factorization")]
    RankOutOfRange {
        rank: usize,
        max: usize,
        rows: usize,
        cols: usize,
    },
    /// The requested parameter density rounds to a rank below one.
    #[error("parameter density {density} yields a rank below 1 for a {rows} x {cols} weight")]
    DensityTooSmall {
        density: f32,
        rows: usize,
        cols: usize,
    },
    /// Kronecker factor shape does not evenly divide the weight shape.
    #[error("kronecker factor shape {shape2:?} does not divide weight shape {shape:?}")]
    KroneckerIndivisible {
        shape: (usize, usize),
        shape2: (usize, usize),
    },
    /// A manifold member's shape disagrees with its descriptor.
    #[error("parameter `{name}` has shape {got:?} but manifold `{manifold}` expects {expected:?}")]
    ManifoldShapeMismatch {
        manifold: String,
        name: String,
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// One parameter was declared by two manifold descriptors.
    #[error("parameter `{name}` is claimed by manifolds `{first}` and `{second}`")]
    DuplicateManifoldMember {
        name: String,
        first: String,
        second: String,
    },
    /// A manifold group's members are not the two factors of one
    /// manifold-constrained factor set, so no retraction could reach them.
    #[error("manifold `{manifold}` is not bound to a fixed-rank factor set (member `{name}`)")]
    UnboundManifold { manifold: String, name: String },
    /// Inputs and labels handed to a compiled function disagree on batch size.
    #[error("batch mismatch: {inputs} input rows but {labels} labels")]
    BatchMismatch { inputs: usize, labels: usize },
    /// A class label does not index into the output layer.
    #[error("label {label} is outside 0..{classes}")]
    LabelOutOfRange { label: usize, classes: usize },
    /// An iterative decomposition did not converge.
    #[error("{operation} failed to converge")]
    Decomposition { operation: &'static str },
}

/// Coarse classification of [`TensorError`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised while constructing layers, networks or optimizers.
    Configuration,
    /// The caller fed a compiled function inconsistent batches.
    CallerUsage,
    /// Operands of an operator disagree on shape.
    Shape,
    /// A computation produced or received unusable numbers.
    Numeric,
}

impl TensorError {
    /// Returns the taxonomy bucket the error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TensorError::InvalidDimensions { .. }
            | TensorError::InvalidValue { .. }
            | TensorError::InvalidLearningRate { .. }
            | TensorError::MissingParameter { .. }
            | TensorError::UnknownLayerType { .. }
            | TensorError::RankOutOfRange { .. }
            | TensorError::DensityTooSmall { .. }
            | TensorError::KroneckerIndivisible { .. }
            | TensorError::ManifoldShapeMismatch { .. }
            | TensorError::DuplicateManifoldMember { .. }
            | TensorError::UnboundManifold { .. } => ErrorKind::Configuration,
            TensorError::BatchMismatch { .. } | TensorError::LabelOutOfRange { .. } => {
                ErrorKind::CallerUsage
            }
            TensorError::DataLength { .. }
            | TensorError::ShapeMismatch { .. }
            | TensorError::EmptyInput(_) => ErrorKind::Shape,
            TensorError::NonFiniteValue { .. } | TensorError::Decomposition { .. } => {
                ErrorKind::Numeric
            }
        }
    }

    /// Convenience predicate for construction-time failures.
    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }
}

/// A simple row-major 2D tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> PureResult<Self> {
        Self::from_vec(rows, cols, vec![0.0; rows * cols])
    }

    /// Create a square identity matrix.
    pub fn eye(n: usize) -> PureResult<Self> {
        Self::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    /// Create a tensor from raw data. The provided vector must match
    /// `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let expected = rows * cols;
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`
    /// from the caller's RNG.
    pub fn random_uniform<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        rng: &mut R,
    ) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let distribution = Uniform::new(min, max);
        let data = (0..rows * cols)
            .map(|_| distribution.sample(&mut *rng))
            .collect();
        Self::from_vec(rows, cols, data)
    }

    /// Construct a tensor by sampling a normal distribution with the provided
    /// mean and standard deviation.
    pub fn random_normal<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        mean: f32,
        std: f32,
        rng: &mut R,
    ) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if std <= 0.0 || !std.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let data = (0..rows * cols)
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut *rng);
                mean + std * sample as f32
            })
            .collect();
        Self::from_vec(rows, cols, data)
    }

    /// Construct a tensor by applying a generator function to each coordinate.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self::from_vec(rows, cols, data)
    }

    /// Returns the `(rows, cols)` pair of the tensor.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Tensors always hold at least one element.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a read-only view of the underlying buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns a mutable view of the underlying buffer.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Reads one element.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    /// Borrows one row.
    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Matrix multiply (`self @ other`).
    pub fn matmul(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let (rows, inner, cols) = (self.rows, self.cols, other.cols);
        let mut out = vec![0.0f32; rows * cols];
        let kernel = |(r, dst): (usize, &mut [f32])| {
            matmul_row(&self.data[r * inner..(r + 1) * inner], &other.data, cols, dst);
        };
        if rows > 1 && rows * inner * cols >= PARALLEL_MATMUL_VOLUME {
            out.par_chunks_mut(cols).enumerate().for_each(kernel);
        } else {
            out.chunks_mut(cols).enumerate().for_each(kernel);
        }
        Tensor::from_vec(rows, cols, out)
    }

    /// Returns a new tensor where every element is scaled by `value`.
    pub fn scale(&self, value: f32) -> PureResult<Tensor> {
        self.map(|a| a * value)
    }

    /// Applies `f` to every element.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> PureResult<Tensor> {
        Tensor::from_vec(self.rows, self.cols, self.data.iter().map(|&a| f(a)).collect())
    }

    /// Add a scaled tensor to this tensor (`self += scale * other`).
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += scale * b;
        }
        Ok(())
    }

    /// Add the provided row vector to every row (`self[row] += bias`).
    pub fn add_row_inplace(&mut self, bias: &[f32]) -> PureResult<()> {
        if bias.len() != self.cols {
            return Err(TensorError::DataLength {
                expected: self.cols,
                got: bias.len(),
            });
        }
        for row in self.data.chunks_mut(self.cols) {
            for (value, b) in row.iter_mut().zip(bias) {
                *value += b;
            }
        }
        Ok(())
    }

    /// Apply the ReLU activation in-place (`self[i] = max(self[i], 0)`).
    pub fn relu_inplace(&mut self) {
        for value in self.data.iter_mut() {
            if *value < 0.0 {
                *value = 0.0;
            }
        }
    }

    /// Numerically stable softmax over every row.
    pub fn row_softmax(&self) -> PureResult<Tensor> {
        let mut data = Vec::with_capacity(self.len());
        for row in self.data.chunks(self.cols) {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let start = data.len();
            let mut total = 0.0f32;
            for &value in row {
                let e = (value - max).exp();
                total += e;
                data.push(e);
            }
            let inv = 1.0 / total.max(f32::MIN_POSITIVE);
            for value in &mut data[start..] {
                *value *= inv;
            }
        }
        Tensor::from_vec(self.rows, self.cols, data)
    }

    /// Column index of the largest value in each row (first one on ties).
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.data
            .chunks(self.cols)
            .map(|row| {
                let mut best = 0usize;
                for (idx, &value) in row.iter().enumerate() {
                    if value > row[best] {
                        best = idx;
                    }
                }
                best
            })
            .collect()
    }

    /// Returns the transpose of the tensor.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0f32; self.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Tensor {
            data,
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Returns a reshaped copy of the tensor when the requested dimensions are compatible.
    pub fn reshape(&self, rows: usize, cols: usize) -> PureResult<Tensor> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if rows * cols != self.len() {
            return Err(TensorError::DataLength {
                expected: rows * cols,
                got: self.len(),
            });
        }
        Tensor::from_vec(rows, cols, self.data.clone())
    }

    /// Returns the sum over rows for each column.
    pub fn sum_axis0(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.cols];
        for row in self.data.chunks(self.cols) {
            for (sum, value) in sums.iter_mut().zip(row) {
                *sum += value;
            }
        }
        sums
    }

    /// Gathers the requested rows into a new tensor, preserving order.
    pub fn select_rows(&self, indices: &[usize]) -> PureResult<Tensor> {
        if indices.is_empty() {
            return Err(TensorError::EmptyInput("Tensor::select_rows"));
        }
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &idx in indices {
            if idx >= self.rows {
                return Err(TensorError::ShapeMismatch {
                    left: self.shape(),
                    right: (idx + 1, self.cols),
                });
            }
            data.extend_from_slice(self.row(idx));
        }
        Tensor::from_vec(indices.len(), self.cols, data)
    }

    /// Concatenates tensors row-wise producing a new tensor whose row count is the sum
    /// of the inputs while preserving the shared column dimension.
    pub fn cat_rows(tensors: &[Tensor]) -> PureResult<Tensor> {
        if tensors.is_empty() {
            return Err(TensorError::EmptyInput("Tensor::cat_rows"));
        }
        let cols = tensors[0].cols;
        let mut total_rows = 0usize;
        for tensor in tensors {
            if tensor.cols != cols {
                return Err(TensorError::ShapeMismatch {
                    left: tensor.shape(),
                    right: (tensor.rows, cols),
                });
            }
            total_rows += tensor.rows;
        }
        let mut data = Vec::with_capacity(total_rows * cols);
        for tensor in tensors {
            data.extend_from_slice(&tensor.data);
        }
        Tensor::from_vec(total_rows, cols, data)
    }

    /// Computes the squared L2 norm of the tensor.
    pub fn squared_l2_norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Largest absolute element-wise difference against `other`.
    pub fn max_abs_diff(&self, other: &Tensor) -> PureResult<f32> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }

    /// Returns `true` when every element is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

fn matmul_row(lhs: &[f32], rhs: &[f32], cols: usize, dst: &mut [f32]) {
    for (k, &a) in lhs.iter().enumerate() {
        if a == 0.0 {
            continue;
        }
        let rhs_row = &rhs[k * cols..(k + 1) * cols];
        for (out, &b) in dst.iter_mut().zip(rhs_row) {
            *out += a * b;
        }
    }
}
