// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rand::{rngs::StdRng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default base seed used when `RANKFOLD_SEED` is not set.
pub const DEFAULT_SEED: u64 = 42;

/// Seed configuration for a run. There is no process-wide RNG: callers build
/// a config, derive a labelled [`StdRng`] and thread it explicitly through
/// every allocation that needs randomness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeterminismConfig {
    /// Base seed used to derive per-component seeds.
    pub base_seed: u64,
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            base_seed: DEFAULT_SEED,
        }
    }
}

impl DeterminismConfig {
    /// Creates a configuration with an explicit base seed.
    pub fn with_seed(base_seed: u64) -> Self {
        Self { base_seed }
    }

    /// Builds a configuration snapshot from `RANKFOLD_SEED`. Unparsable values
    /// fall back to [`DEFAULT_SEED`].
    pub fn from_env() -> Self {
        let base_seed = std::env::var("RANKFOLD_SEED")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_SEED);
        Self { base_seed }
    }

    /// Derives a deterministic seed for a given component label.
    pub fn seed_for<L: Hash>(&self, label: L) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.base_seed.hash(&mut hasher);
        label.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns a RNG derived from the provided label.
    pub fn rng_for(&self, label: &str) -> StdRng {
        StdRng::seed_from_u64(self.seed_for(label))
    }
}

/// Returns a RNG seeded from an optional explicit seed, deriving one from the
/// label and `config` otherwise.
pub fn rng_from_optional(config: &DeterminismConfig, seed: Option<u64>, label: &str) -> StdRng {
    match seed {
        Some(value) => StdRng::seed_from_u64(value),
        None => config.rng_for(label),
    }
}
