// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Structured dense layers for small classifiers.
//!
//! A layer's weight can be stored densely, as a low-rank product `U·V`, as a
//! sum of Kronecker products, or as Kronecker blocks read off unconstrained
//! `U`/`V` factors. Low-rank and Kronecker factors are trained on the
//! fixed-rank manifold by [`optim::ManifoldSgd`]; every other parameter gets a
//! plain SGD update.
//!
//! ```no_run
//! use rand::SeedableRng;
//! use rf_nn::{build_network, compile, FactorConfig, LayerKind, NetworkConfig};
//!
//! let config = NetworkConfig::default()
//!     .with_kind(LayerKind::LowRank)
//!     .with_factors(FactorConfig::default().with_rank(8));
//! let network = build_network(&config, &mut rand::rngs::StdRng::seed_from_u64(42))?;
//! let model = compile(network, 0.1)?;
//! # let _ = model;
//! # Ok::<(), rf_nn::TensorError>(())
//! ```

pub mod compile;
pub mod dataset;
pub mod factor;
pub mod layers;
pub mod loss;
pub mod manifold;
pub mod module;
pub mod network;
pub mod optim;
pub mod registry;
pub mod trainer;

pub use compile::{compile, CompiledModel, StepStats};
pub use dataset::Dataset;
pub use factor::{resolve_rank, FactorConfig, FactorPoint, FactorSet, Factorization, LayerKind, RankChoice};
pub use layers::{Activation, Dense, Sequential, StructuredDense};
pub use manifold::{FixedRank, ManifoldDescriptor, ManifoldRegistry, NumericWarning, TangentVector};
pub use module::{Module, Parameter};
pub use network::{build_network, InputShape, Network, NetworkConfig};
pub use optim::{ManifoldSgd, StepReport, UpdateRule};
pub use registry::ParameterRegistry;
pub use trainer::{ExperimentRecord, ModuleTrainer};

pub use rf_tensor::{ErrorKind, PureResult, Tensor, TensorError};
