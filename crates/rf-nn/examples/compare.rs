// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Trains every layer variant on the same synthetic blobs and prints the
//! records as JSON lines.
//!
//! Configuration comes from `RANKFOLD_CONFIG_BASE` / `RANKFOLD_CONFIG_RUN`
//! (a `[network]` section) and the seed from `RANKFOLD_SEED`.

use rankfold_config::determinism::rng_from_optional;
use rankfold_config::{ConfigLayering, DeterminismConfig, LayeredConfig};
use rf_nn::{Dataset, InputShape, LayerKind, ModuleTrainer, NetworkConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    rankfold_config::tracing::init_tracing()?;
    let determinism = DeterminismConfig::from_env();
    let layered = LayeredConfig::load(ConfigLayering::discover())?;
    let base = NetworkConfig::from_layered(&layered)?;

    let features = 64;
    let data_seed = std::env::var("RANKFOLD_DATA_SEED")
        .ok()
        .and_then(|value| value.parse().ok());
    let mut rng = rng_from_optional(&determinism, data_seed, "data");
    let raw = Dataset::synthetic_classification(2_000, features, base.classes, 0.5, &mut rng)?;
    let data = Dataset::new(raw.inputs().scale(0.125)?, raw.labels().to_vec())?;
    let (train, validation) = data.split(1_600)?;

    let base = NetworkConfig {
        input: InputShape::flat(features),
        ..base
    };
    let runs: Vec<(String, NetworkConfig)> = [
        LayerKind::Dense,
        LayerKind::LowRank,
        LayerKind::Kron,
        LayerKind::UvKron,
    ]
    .into_iter()
    .map(|kind| (kind.to_string(), base.clone().with_kind(kind)))
    .collect();

    let trainer = ModuleTrainer::new(32, 3, 0.1).with_determinism(determinism);
    for record in trainer.compare(&runs, &train, Some(&validation))? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}
