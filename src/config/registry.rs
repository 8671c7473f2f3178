//! Display names for the models an endpoint serves.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::likelihood::ModelSpec;

use super::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub model_id: String,
}

impl ModelEntry {
    pub fn new(name: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_id: model_id.into(),
        }
    }

    pub fn spec(&self) -> ModelSpec {
        ModelSpec::new(&self.name, &self.model_id)
    }
}

/// Ordered mapping from display name to server model id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self {
            entries: vec![
                ModelEntry::new("Llama2-7B", "meta-llama/Llama-2-7b-hf"),
                ModelEntry::new("Mistral-7B", "mistralai/Mistral-7B-v0.1"),
                ModelEntry::new("Llama3-8B", "meta-llama/Meta-Llama-3-8B"),
            ],
        }
    }
}

impl ModelRegistry {
    pub fn new(entries: Vec<ModelEntry>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        Ok(Self { entries })
    }

    /// Parse `Name=model/id,Other=org/model`.
    pub fn parse_list(raw: &str) -> Result<Self, ConfigError> {
        let entries = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((name, id)) if !name.trim().is_empty() && !id.trim().is_empty() => {
                    Ok(ModelEntry::new(name.trim(), id.trim()))
                }
                _ => Err(ConfigError::InvalidModelEntry {
                    entry: entry.to_string(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    /// Load a JSON array of `{"name": ..., "model_id": ...}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::RegistryRead {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<ModelEntry> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::RegistryParse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::new(entries)
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    /// Resolve a display name. Unknown names are taken as raw model ids.
    pub fn resolve(&self, name: &str) -> ModelSpec {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(ModelEntry::spec)
            .unwrap_or_else(|| ModelSpec::new(name, name))
    }

    /// Every registered model, or just the named ones in the given order.
    pub fn select(&self, names: Option<&[String]>) -> Vec<ModelSpec> {
        match names {
            Some(names) if !names.is_empty() => names.iter().map(|n| self.resolve(n)).collect(),
            _ => self.entries.iter().map(ModelEntry::spec).collect(),
        }
    }
}
