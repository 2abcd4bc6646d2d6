// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Dense row-major tensors plus the handful of decompositions the factorized
//! layers lean on. Everything runs on the CPU; QR and SVD are delegated to
//! `nalgebra` in double precision.

pub mod kron;
pub mod linalg;
pub mod pure;

pub use kron::{kron, KronShape};
pub use pure::{ErrorKind, PureResult, Tensor, TensorError};
