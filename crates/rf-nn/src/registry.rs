// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, TensorError};

/// One learnable tensor as seen by the optimizer builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterEntry {
    pub name: String,
    pub shape: (usize, usize),
}

/// Ordered name → shape mapping over every learnable tensor of a network,
/// in `visit_parameters` order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterRegistry {
    entries: Vec<ParameterEntry>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter. Names must be unique.
    pub fn insert(&mut self, name: &str, shape: (usize, usize)) -> PureResult<()> {
        if self.contains(name) {
            return Err(TensorError::InvalidValue {
                label: "duplicate_parameter_name",
            });
        }
        self.entries.push(ParameterEntry {
            name: name.to_string(),
            shape,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParameterEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of scalars across all registered tensors.
    pub fn scalar_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| entry.shape.0 * entry.shape.1)
            .sum()
    }
}
