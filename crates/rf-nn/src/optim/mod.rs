// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Plain SGD that routes fixed-rank factor groups through a manifold
//! retraction instead of independent Euclidean updates.

use crate::factor::{FactorPoint, FactorSet};
use crate::manifold::{ManifoldDescriptor, ManifoldRegistry, NumericWarning};
use crate::module::Module;
use crate::registry::ParameterRegistry;
use crate::{PureResult, Tensor, TensorError};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// How a single parameter is updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateRule {
    /// `p ← p − lr · ∂L/∂p`.
    Euclidean { parameter: String },
    /// Slot `member` of a manifold group, updated jointly with its partner.
    Manifold { group: String, member: usize },
}

/// Summary of one optimizer step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReport {
    pub euclidean_updates: usize,
    pub manifold_updates: usize,
    pub numeric_warnings: Vec<NumericWarning>,
}

impl StepReport {
    pub fn warning_count(&self) -> usize {
        self.numeric_warnings.len()
    }
}

/// Manifold-aware stochastic gradient descent.
#[derive(Debug)]
pub struct ManifoldSgd {
    learning_rate: f32,
    rules: Vec<(String, UpdateRule)>,
    lookup: HashMap<String, usize>,
    groups: HashMap<String, ManifoldDescriptor>,
}

impl ManifoldSgd {
    /// Validates the manifold declarations against the parameter listing and
    /// assigns one rule per parameter, in registry order.
    pub fn build(
        parameters: &ParameterRegistry,
        manifolds: &ManifoldRegistry,
        learning_rate: f32,
    ) -> PureResult<Self> {
        if !learning_rate.is_finite() || learning_rate < 0.0 {
            return Err(TensorError::InvalidLearningRate {
                rate: learning_rate,
            });
        }
        let mut claimed: HashMap<String, (String, usize)> = HashMap::new();
        for group in manifolds.iter() {
            for (slot, (member, expected)) in group
                .members()
                .iter()
                .zip(group.member_shapes())
                .enumerate()
            {
                let Some(entry) = parameters.get(member) else {
                    return Err(TensorError::MissingParameter {
                        name: member.clone(),
                    });
                };
                if entry.shape != expected {
                    return Err(TensorError::ManifoldShapeMismatch {
                        manifold: group.name().to_string(),
                        name: member.clone(),
                        expected,
                        got: entry.shape,
                    });
                }
                if let Some((first, _)) = claimed.get(member) {
                    return Err(TensorError::DuplicateManifoldMember {
                        name: member.clone(),
                        first: first.clone(),
                        second: group.name().to_string(),
                    });
                }
                claimed.insert(member.clone(), (group.name().to_string(), slot));
            }
        }

        let mut rules = Vec::with_capacity(parameters.len());
        let mut lookup = HashMap::with_capacity(parameters.len());
        for entry in parameters.iter() {
            let rule = match claimed.remove(&entry.name) {
                Some((group, member)) => UpdateRule::Manifold { group, member },
                None => UpdateRule::Euclidean {
                    parameter: entry.name.clone(),
                },
            };
            lookup.insert(entry.name.clone(), rules.len());
            rules.push((entry.name.clone(), rule));
        }
        let groups = manifolds
            .iter()
            .map(|group| (group.name().to_string(), group.clone()))
            .collect::<HashMap<_, _>>();
        debug!(
            learning_rate,
            parameters = rules.len(),
            manifold_groups = groups.len(),
            "manifold sgd built"
        );
        Ok(Self {
            learning_rate,
            rules,
            lookup,
            groups,
        })
    }

    /// [`ManifoldSgd::build`] over `module`'s parameters, additionally
    /// requiring every manifold group to be the `(u, v)` pair of one
    /// fixed-rank factor set inside `module`.
    pub fn for_module(
        module: &dyn Module,
        manifolds: &ManifoldRegistry,
        learning_rate: f32,
    ) -> PureResult<Self> {
        let optimizer = Self::build(&module.parameter_registry()?, manifolds, learning_rate)?;
        optimizer.bound_groups(module)?;
        Ok(optimizer)
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Rule assigned to `parameter`.
    pub fn rule(&self, parameter: &str) -> Option<&UpdateRule> {
        self.lookup
            .get(parameter)
            .map(|&index| &self.rules[index].1)
    }

    /// `(parameter, rule)` pairs in registry order.
    pub fn rules(&self) -> impl Iterator<Item = (&str, &UpdateRule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    /// Group that owns `set`, or `None` when none of its factors carry a
    /// manifold rule. A set only partially claimed by a group, or one that
    /// cannot be retracted, is rejected.
    fn group_for(&self, set: &FactorSet) -> PureResult<Option<&ManifoldDescriptor>> {
        let claimed = set.factors().iter().find_map(|param| match self.rule(param.name()) {
            Some(UpdateRule::Manifold { group, .. }) => Some((param.name(), group)),
            _ => None,
        });
        let Some((member, group)) = claimed else {
            return Ok(None);
        };
        let descriptor = self.groups.get(group).ok_or_else(|| TensorError::MissingParameter {
            name: group.clone(),
        })?;
        let names: Vec<&str> = set.factors().iter().map(|param| param.name()).collect();
        let bound = set.is_manifold_constrained()
            && names.len() == 2
            && names.iter().zip(descriptor.members()).all(|(name, member)| *name == member.as_str());
        if !bound {
            return Err(TensorError::UnboundManifold {
                manifold: descriptor.name().to_string(),
                name: member.to_string(),
            });
        }
        Ok(Some(descriptor))
    }

    /// Checks that every group is reachable through a factor set of `module`.
    fn bound_groups(&self, module: &dyn Module) -> PureResult<()> {
        let mut bound = HashSet::new();
        module.visit_factor_sets(&mut |set| {
            if let Some(descriptor) = self.group_for(set)? {
                bound.insert(descriptor.name().to_string());
            }
            Ok(())
        })?;
        self.check_all_bound(&bound)
    }

    fn check_all_bound(&self, bound: &HashSet<String>) -> PureResult<()> {
        let mut names: Vec<&String> = self.groups.keys().collect();
        names.sort();
        match names.into_iter().find(|name| !bound.contains(name.as_str())) {
            Some(name) => Err(TensorError::UnboundManifold {
                manifold: name.clone(),
                name: self.groups[name].members()[0].clone(),
            }),
            None => Ok(()),
        }
    }

    /// Applies one update from the accumulated gradients and clears them.
    ///
    /// Every new value is computed before any is written, so a failure leaves
    /// the module untouched.
    pub fn step(&mut self, module: &mut dyn Module) -> PureResult<StepReport> {
        let lr = self.learning_rate;
        let mut report = StepReport::default();

        let mut staged: HashMap<String, Tensor> = HashMap::new();
        module.visit_parameters(&mut |param| {
            let rule = self.rule(param.name()).ok_or_else(|| TensorError::MissingParameter {
                name: param.name().to_string(),
            })?;
            if let (UpdateRule::Euclidean { .. }, Some(grad)) = (rule, param.gradient()) {
                let mut next = param.value().clone();
                next.add_scaled(grad, -lr)?;
                staged.insert(param.name().to_string(), next);
            }
            Ok(())
        })?;
        report.euclidean_updates = staged.len();

        let mut points: HashMap<String, FactorPoint> = HashMap::new();
        let mut bound = HashSet::new();
        module.visit_factor_sets(&mut |set| {
            let Some(descriptor) = self.group_for(set)? else {
                return Ok(());
            };
            bound.insert(descriptor.name().to_string());
            let (Some(point), Some(grad)) = (set.point(), set.ambient_gradient()) else {
                return Ok(());
            };
            let tangent = descriptor.project(&point, grad)?;
            let retraction = descriptor.retract(&point, &tangent.scaled(-1.0), lr as f64)?;
            if let Some(warning) = retraction.warning {
                warn!(
                    group = %descriptor.name(),
                    kind = ?warning.kind,
                    smallest = warning.smallest,
                    largest = warning.largest,
                    "retraction recovered from numeric trouble"
                );
                report.numeric_warnings.push(warning);
            }
            points.insert(set.name().to_string(), retraction.point);
            Ok(())
        })?;
        report.manifold_updates = points.len();
        self.check_all_bound(&bound)?;

        module.visit_parameters_mut(&mut |param| {
            if let Some(next) = staged.get(param.name()) {
                param.load_value(next)?;
            }
            Ok(())
        })?;
        module.visit_factor_sets_mut(&mut |set| {
            if let Some(point) = points.get(set.name()) {
                set.load_point(point)?;
            }
            Ok(())
        })?;
        module.zero_accumulators()?;
        Ok(report)
    }
}
