// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ::tracing::debug;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration files merged in order: a TOML base followed by a JSON run
/// override.
#[derive(Clone, Debug, Default)]
pub struct ConfigLayering {
    pub base: Option<PathBuf>,
    pub run: Option<PathBuf>,
}

impl ConfigLayering {
    /// Discovers configuration files through `RANKFOLD_CONFIG_BASE` and
    /// `RANKFOLD_CONFIG_RUN`. Files that do not exist are ignored.
    pub fn discover() -> Self {
        let base = std::env::var("RANKFOLD_CONFIG_BASE")
            .map(PathBuf::from)
            .ok()
            .and_then(existing_path);
        let run = std::env::var("RANKFOLD_CONFIG_RUN")
            .map(PathBuf::from)
            .ok()
            .and_then(existing_path);
        ConfigLayering { base, run }
    }

    /// Overrides the base layer path.
    pub fn with_base<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base = Some(path.into());
        self
    }

    /// Overrides the run layer path.
    pub fn with_run<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.run = Some(path.into());
        self
    }
}

fn existing_path(path: PathBuf) -> Option<PathBuf> {
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

/// Result of merging layered configuration files.
#[derive(Clone, Debug)]
pub struct LayeredConfig {
    layering: ConfigLayering,
    value: Value,
    overridden: Vec<String>,
}

impl LayeredConfig {
    /// Loads the configured layers, merging base → run.
    pub fn load(layering: ConfigLayering) -> Result<Self, LayeredConfigError> {
        let mut value = Value::Object(Default::default());
        let mut overridden = Vec::new();

        if let Some(base_path) = layering.base.as_ref() {
            if let Some(layer) = load_toml(base_path)? {
                merge(&mut value, &layer, &mut Vec::new(), &mut overridden);
            }
        }
        if let Some(run_path) = layering.run.as_ref() {
            if let Some(layer) = load_json(run_path)? {
                merge(&mut value, &layer, &mut Vec::new(), &mut overridden);
            }
        }
        debug!(overrides = overridden.len(), "layered configuration loaded");

        Ok(LayeredConfig {
            layering,
            value,
            overridden,
        })
    }

    /// Returns the merged configuration as a `serde_json::Value`.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the layering metadata used for this configuration.
    pub fn layering(&self) -> &ConfigLayering {
        &self.layering
    }

    /// Dotted paths whose value was replaced by a later layer.
    pub fn overridden(&self) -> &[String] {
        &self.overridden
    }

    /// Extracts a typed view of a nested configuration section. The path is
    /// expressed as a slice of keys that will be traversed in order.
    pub fn section<T>(&self, path: &[&str]) -> Result<Option<T>, LayeredConfigError>
    where
        T: DeserializeOwned,
    {
        let mut node = &self.value;
        for key in path {
            match node {
                Value::Object(map) => match map.get(*key) {
                    Some(value) => node = value,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        serde_json::from_value(node.clone())
            .map(Some)
            .map_err(|source| LayeredConfigError::Section {
                path: path.join("."),
                source,
            })
    }
}

/// Parses a typed configuration straight from TOML text.
pub fn from_toml_str<T: DeserializeOwned>(text: &str) -> Result<T, LayeredConfigError> {
    toml::from_str(text).map_err(|source| LayeredConfigError::Toml {
        path: PathBuf::from("<inline>"),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum LayeredConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse JSON {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("section `{path}` does not match the requested type: {source}")]
    Section {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

fn load_toml(path: &Path) -> Result<Option<Value>, LayeredConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| LayeredConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: toml::Value = toml::from_str(&text).map_err(|source| LayeredConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_value(value)
        .map(Some)
        .map_err(|source| LayeredConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn load_json(path: &Path) -> Result<Option<Value>, LayeredConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path).map_err(|source| LayeredConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| LayeredConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
}

fn merge(dest: &mut Value, src: &Value, path: &mut Vec<String>, overridden: &mut Vec<String>) {
    match (dest, src) {
        (Value::Object(dest_map), Value::Object(src_map)) => {
            for (key, value) in src_map {
                path.push(key.clone());
                match dest_map.get_mut(key) {
                    Some(existing) => merge(existing, value, path, overridden),
                    None => {
                        dest_map.insert(key.clone(), value.clone());
                    }
                }
                path.pop();
            }
        }
        (dest_slot, src_value) => {
            if *dest_slot != *src_value && !dest_slot.is_null() {
                overridden.push(path.join("."));
            }
            *dest_slot = src_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Factors {
        rank: usize,
        shape2: (usize, usize),
    }

    #[test]
    fn merges_layers_and_reports_overrides() {
        let root = tempfile::tempdir().unwrap();

        let base = root.path().join("base.toml");
        fs::write(
            &base,
            r#"
            [network.factors]
            rank = 4
            shape2 = [4, 4]
            "#,
        )
        .unwrap();

        let run = root.path().join("run.json");
        fs::write(&run, r#"{"network":{"factors":{"rank":2}}}"#).unwrap();

        let stacked =
            LayeredConfig::load(ConfigLayering::default().with_base(&base).with_run(&run))
                .unwrap();
        let factors: Factors = stacked
            .section(&["network", "factors"])
            .unwrap()
            .unwrap();
        assert_eq!(
            factors,
            Factors {
                rank: 2,
                shape2: (4, 4)
            }
        );
        assert_eq!(stacked.overridden(), &["network.factors.rank".to_string()]);
        assert!(stacked.section::<Factors>(&["missing"]).unwrap().is_none());
    }

    #[test]
    fn missing_layers_are_skipped() {
        let layering = ConfigLayering::default().with_base("/definitely/not/here.toml");
        let stacked = LayeredConfig::load(layering).unwrap();
        assert_eq!(stacked.value(), &Value::Object(Default::default()));
    }

    #[test]
    fn inline_toml_parses_typed_sections() {
        let factors: Factors = from_toml_str("rank = 3\nshape2 = [2, 2]\n").unwrap();
        assert_eq!(factors.rank, 3);
        assert!(from_toml_str::<Factors>("rank = \"three\"").is_err());
    }
}
