// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod activation;
pub mod dense;
pub mod sequential;
pub mod structured;

pub use activation::Activation;
pub use dense::Dense;
pub use sequential::Sequential;
pub use structured::StructuredDense;
