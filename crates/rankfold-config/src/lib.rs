// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Runtime configuration shared by the RankFold crates: seed derivation,
//! tracing bootstrap, and layered TOML/JSON loading.

pub mod determinism;
pub mod layered;
pub mod tracing;

pub use determinism::DeterminismConfig;
pub use layered::{ConfigLayering, LayeredConfig, LayeredConfigError};
