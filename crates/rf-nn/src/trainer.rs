// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::compile::{compile, CompiledModel};
use crate::dataset::Dataset;
use crate::network::{build_network, NetworkConfig};
use crate::PureResult;
use rand::rngs::StdRng;
use rankfold_config::DeterminismConfig;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Per-epoch training summary.
#[derive(Clone, Debug, PartialEq)]
pub struct EpochStats {
    pub mean_loss: f32,
    pub accuracy: f32,
    pub batch_losses: Vec<f32>,
    pub numeric_warnings: usize,
    pub seconds: f64,
}

/// Learning curves of one named run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub name: String,
    pub parameters: usize,
    pub train_loss: Vec<f32>,
    pub train_accuracy: Vec<f32>,
    pub val_accuracy: Vec<f32>,
    pub epoch_seconds: Vec<f64>,
    pub numeric_warnings: usize,
}

/// Mini-batch training loop shared by every layer variant.
#[derive(Debug, Clone, Copy)]
pub struct ModuleTrainer {
    batch_size: usize,
    epochs: usize,
    learning_rate: f32,
    determinism: DeterminismConfig,
}

impl ModuleTrainer {
    pub fn new(batch_size: usize, epochs: usize, learning_rate: f32) -> Self {
        Self {
            batch_size,
            epochs,
            learning_rate,
            determinism: DeterminismConfig::default(),
        }
    }

    pub fn with_determinism(mut self, determinism: DeterminismConfig) -> Self {
        self.determinism = determinism;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// One pass over `data` in shuffled mini-batches.
    pub fn run_epoch(
        &self,
        model: &mut CompiledModel,
        data: &Dataset,
        rng: &mut StdRng,
    ) -> PureResult<EpochStats> {
        let started = Instant::now();
        let batches = data.batches(self.batch_size, Some(rng))?;
        let mut batch_losses = Vec::with_capacity(batches.len());
        let mut hits = 0.0f32;
        let mut numeric_warnings = 0;
        for (inputs, labels) in &batches {
            let stats = model.train_step(inputs, labels)?;
            batch_losses.push(stats.loss);
            hits += stats.accuracy;
            numeric_warnings += stats.numeric_warnings;
        }
        let count = batch_losses.len().max(1) as f32;
        Ok(EpochStats {
            mean_loss: batch_losses.iter().sum::<f32>() / count,
            accuracy: hits / count,
            batch_losses,
            numeric_warnings,
            seconds: started.elapsed().as_secs_f64(),
        })
    }

    /// Trains `model` for the configured number of epochs.
    pub fn fit(
        &self,
        name: &str,
        model: &mut CompiledModel,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> PureResult<ExperimentRecord> {
        let mut rng = self.determinism.rng_for("shuffle");
        let mut record = ExperimentRecord {
            name: name.to_string(),
            parameters: model.network().parameter_count()?,
            ..ExperimentRecord::default()
        };
        for epoch in 0..self.epochs {
            let stats = self.run_epoch(model, train, &mut rng)?;
            let val_accuracy = match validation {
                Some(data) => Some(model.accuracy(data.inputs(), data.labels())?),
                None => None,
            };
            info!(
                run = name,
                epoch,
                loss = stats.mean_loss,
                accuracy = stats.accuracy,
                val_accuracy = ?val_accuracy,
                seconds = stats.seconds,
                "epoch finished"
            );
            record.train_loss.push(stats.mean_loss);
            record.train_accuracy.push(stats.accuracy);
            record.val_accuracy.extend(val_accuracy);
            record.epoch_seconds.push(stats.seconds);
            record.numeric_warnings += stats.numeric_warnings;
        }
        Ok(record)
    }

    /// Builds, compiles and fits every named configuration on the same data
    /// and batch order.
    pub fn compare(
        &self,
        runs: &[(String, NetworkConfig)],
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> PureResult<Vec<ExperimentRecord>> {
        runs.iter()
            .map(|(name, config)| {
                let mut rng = self.determinism.rng_for(name);
                let network = build_network(config, &mut rng)?;
                let mut model = compile(network, self.learning_rate)?;
                self.fit(name, &mut model, train, validation)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factor::{FactorConfig, LayerKind};
    use crate::network::InputShape;

    #[test]
    fn compare_records_one_curve_per_run() {
        let determinism = DeterminismConfig::with_seed(9);
        let mut rng = determinism.rng_for("data");
        let data = Dataset::synthetic_classification(48, 12, 3, 0.3, &mut rng).unwrap();
        let (train, val) = data.split(36).unwrap();
        let base = NetworkConfig {
            input: InputShape::flat(12),
            widths: vec![6],
            classes: 3,
            ..NetworkConfig::default()
        };
        let runs = vec![
            ("dense".to_string(), base.clone()),
            (
                "lowrank".to_string(),
                base.with_kind(LayerKind::LowRank)
                    .with_factors(FactorConfig::default().with_rank(2)),
            ),
        ];
        let trainer = ModuleTrainer::new(6, 2, 0.1).with_determinism(determinism);
        let records = trainer.compare(&runs, &train, Some(&val)).unwrap();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.train_loss.len(), 2);
            assert!(record.train_loss.iter().all(|loss| loss.is_finite()));
            assert!(record.val_accuracy.iter().all(|acc| (0.0..=1.0).contains(acc)));
        }
        assert!(records[1].parameters < records[0].parameters);

        let json = serde_json::to_string(&records[1]).unwrap();
        let back: ExperimentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "lowrank");
    }
}
