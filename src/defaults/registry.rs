use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use super::tables;
use super::traits::{DefaultSource, LookupError};
use super::types::{Method, ParamValue, UnknownMethod};

/// Raw override tables as they appear in TOML: `[sample] num_warmup = 500`
pub type OverrideTables = BTreeMap<String, BTreeMap<String, ParamValue>>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read defaults file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse defaults table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    UnknownMethod(#[from] UnknownMethod),
}

static BUILTIN: LazyLock<Arc<DefaultRegistry>> = LazyLock::new(|| {
    let mut registry = DefaultRegistry::empty();
    for (method, table) in tables::builtin() {
        for (name, value) in table {
            registry.insert(method, name, value);
        }
    }
    tracing::debug!(parameters = registry.len(), "Built-in default tables loaded");
    Arc::new(registry)
});

/// Immutable method → argument → default table
///
/// Built once and only read afterwards, so one instance is shared by every job of a batch.
#[derive(Debug, Clone, Default)]
pub struct DefaultRegistry {
    tables: BTreeMap<Method, BTreeMap<String, ParamValue>>,
}

impl DefaultRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Process-wide registry with the CmdStan argument defaults
    pub fn builtin() -> Arc<DefaultRegistry> {
        BUILTIN.clone()
    }

    /// Parse override tables from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let raw: OverrideTables = toml::from_str(content)?;
        Self::from_overrides(&raw)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_overrides(raw: &OverrideTables) -> Result<Self, RegistryError> {
        let mut registry = Self::empty();
        for (method, table) in raw {
            let method: Method = method.parse()?;
            for (name, value) in table {
                registry.insert(method, name.clone(), value.clone());
            }
        }
        Ok(registry)
    }

    /// New registry where entries of `overrides` replace entries of `self`
    pub fn with_overrides(&self, overrides: &DefaultRegistry) -> DefaultRegistry {
        let mut merged = self.clone();
        for (method, table) in &overrides.tables {
            for (name, value) in table {
                merged.insert(*method, name.clone(), value.clone());
            }
        }
        merged
    }

    fn insert(&mut self, method: Method, name: impl Into<String>, value: ParamValue) {
        self.tables
            .entry(method)
            .or_default()
            .insert(name.into(), value);
    }

    /// Argument names known for `method`, in sorted order
    pub fn names(&self, method: Method) -> impl Iterator<Item = &str> {
        self.tables
            .get(&method)
            .into_iter()
            .flat_map(|table| table.keys().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DefaultSource for DefaultRegistry {
    fn lookup(&self, method: Method, name: &str) -> Result<ParamValue, LookupError> {
        self.tables
            .get(&method)
            .and_then(|table| table.get(name))
            .cloned()
            .ok_or_else(|| LookupError::NotFound {
                method,
                name: name.to_string(),
            })
    }
}
