// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use rankfold_config::{ConfigLayering, LayeredConfig};
use rf_nn::{LayerKind, NetworkConfig};
use std::fs;

#[test]
fn network_config_loads_from_layered_files() {
    let root = tempfile::tempdir().unwrap();
    let base = root.path().join("base.toml");
    let run = root.path().join("run.json");
    fs::write(
        &base,
        r#"
[network]
kind = "lowrank"
widths = [32]

[network.factors]
rank = 4
"#,
    )
    .unwrap();
    fs::write(&run, r#"{ "network": { "factors": { "rank": 2 } } }"#).unwrap();

    let layered = LayeredConfig::load(ConfigLayering::default().with_base(&base).with_run(&run)).unwrap();
    let config = NetworkConfig::from_layered(&layered).unwrap();
    assert_eq!(config.kind, LayerKind::LowRank);
    assert_eq!(config.widths, vec![32]);
    assert_eq!(config.factors.rank, Some(2));
    assert!(config.factors.use_rank);
    assert_eq!(config.classes, 10);
    assert!(layered
        .overridden()
        .iter()
        .any(|path| path == "network.factors.rank"));
}

#[test]
fn missing_network_section_uses_defaults() {
    let layered = LayeredConfig::load(ConfigLayering::default()).unwrap();
    assert_eq!(NetworkConfig::from_layered(&layered).unwrap(), NetworkConfig::default());
}
