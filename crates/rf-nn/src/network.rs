// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Assembly of the benchmark classifier: flattened input, one hidden layer of
//! the selected kind, optional dense hidden layers, softmax output.

use crate::factor::{FactorConfig, LayerKind};
use crate::layers::{Activation, Dense, Sequential, StructuredDense};
use crate::manifold::ManifoldRegistry;
use crate::module::Module;
use crate::{PureResult, TensorError};
use rand::rngs::StdRng;
use rankfold_config::{LayeredConfig, LayeredConfigError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Shape of one input sample before flattening.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            channels: 1,
            height: 28,
            width: 28,
        }
    }
}

impl InputShape {
    pub fn flat(features: usize) -> Self {
        Self {
            channels: 1,
            height: 1,
            width: features,
        }
    }

    /// Length of the flattened sample.
    pub fn features(&self) -> usize {
        self.channels * self.height * self.width
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub input: InputShape,
    /// Hidden widths; the first one uses `kind`, the rest are dense.
    pub widths: Vec<usize>,
    pub kind: LayerKind,
    pub factors: FactorConfig,
    pub classes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            input: InputShape::default(),
            widths: vec![100],
            kind: LayerKind::Dense,
            factors: FactorConfig::default(),
            classes: 10,
        }
    }
}

impl NetworkConfig {
    pub fn with_kind(mut self, kind: LayerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_widths(mut self, widths: Vec<usize>) -> Self {
        self.widths = widths;
        self
    }

    pub fn with_factors(mut self, factors: FactorConfig) -> Self {
        self.factors = factors;
        self
    }

    /// Reads the `[network]` section, falling back to defaults when absent.
    pub fn from_layered(config: &LayeredConfig) -> Result<Self, LayeredConfigError> {
        Ok(config.section(&["network"])?.unwrap_or_default())
    }
}

/// Name of the first hidden layer for each layer kind.
pub fn first_layer_name(kind: LayerKind) -> &'static str {
    match kind {
        LayerKind::Dense => "dense0",
        LayerKind::LowRank => "fixedrank0",
        LayerKind::Kron => "kron_fixedrank0",
        LayerKind::UvKron => "uv0",
    }
}

/// Built classifier plus the manifold declarations of its factored layers.
#[derive(Debug)]
pub struct Network {
    pub model: Sequential,
    pub manifolds: ManifoldRegistry,
    pub config: NetworkConfig,
}

impl Network {
    /// Learnable scalars across the whole model.
    pub fn parameter_count(&self) -> PureResult<usize> {
        Ok(self.model.parameter_registry()?.scalar_count())
    }
}

pub fn build_network(config: &NetworkConfig, rng: &mut StdRng) -> PureResult<Network> {
    let features = config.input.features();
    let Some((&first, rest)) = config.widths.split_first() else {
        return Err(TensorError::InvalidValue {
            label: "network_widths",
        });
    };
    if features == 0 || config.classes == 0 {
        return Err(TensorError::InvalidDimensions {
            rows: features,
            cols: config.classes,
        });
    }

    let mut model = Sequential::new();
    let mut manifolds = ManifoldRegistry::new();
    let name = first_layer_name(config.kind);
    if config.kind == LayerKind::Dense {
        model.push(Dense::new(name, features, first, Activation::Rectify, rng)?);
        debug!(layer = name, width = first, "dense layer allocated");
    } else {
        let layer = StructuredDense::new(
            name,
            features,
            first,
            config.kind,
            &config.factors,
            Activation::Rectify,
            rng,
        )?;
        if let Some(descriptor) = layer.manifold() {
            manifolds.register(descriptor.clone())?;
        }
        model.push(layer);
    }

    let mut width = first;
    for (idx, &next) in rest.iter().enumerate() {
        let name = format!("hidden{}", idx + 1);
        model.push(Dense::new(name.as_str(), width, next, Activation::Rectify, rng)?);
        debug!(layer = %name, width = next, "dense layer allocated");
        width = next;
    }
    model.push(Dense::new("output", width, config.classes, Activation::Softmax, rng)?);

    let network = Network {
        model,
        manifolds,
        config: config.clone(),
    };
    info!(
        kind = %config.kind,
        features,
        classes = config.classes,
        layers = network.model.len(),
        manifold_groups = network.manifolds.len(),
        params = network.parameter_count()?,
        "network built"
    );
    Ok(network)
}
