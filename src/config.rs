//! Observer configuration structures.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::column::Column;

/// Configuration of a single observer.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ObserverConfig {
    /// Tag naming registered observer implementation.
    #[serde(rename = "type")]
    pub type_id: String,
    /// Opaque parameters passed to observer on initialization.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl ObserverConfig {
    /// Create observer configuration without parameters.
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// Observer configuration bound to a column.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ObserverEntry {
    /// Watched column.
    pub column: Column,
    /// Observer configuration.
    #[serde(flatten)]
    pub config: ObserverConfig,
}

impl ObserverEntry {
    /// Bind configuration to a column.
    pub fn new(column: Column, config: ObserverConfig) -> Self {
        Self { column, config }
    }
}

/// Root container for observer configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub struct ObserversConfig {
    /// Observers with strong notifications. Consulted first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observers: Vec<ObserverEntry>,
    /// Observers with weak notifications. Consulted when no strong observer is configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weak_observers: Vec<ObserverEntry>,
    /// Application configuration, visible to every observer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub app: BTreeMap<String, String>,
}

impl ObserversConfig {
    /// Create builder for observer configuration.
    pub fn builder() -> ObserversConfigBuilder {
        ObserversConfigBuilder::new()
    }
}

/// Observer configuration error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ObserversConfigError {
    /// Configuration builder error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Same column configured twice in one registry.
    #[error("column {column} configured more than once in {registry} registry")]
    DuplicateColumn {
        /// Duplicated column.
        column: Column,
        /// Registry name.
        registry: &'static str,
    },
}

/// Builder for observer configuration.
#[must_use]
pub struct ObserversConfigBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl ObserversConfigBuilder {
    /// Alternative method to construct an observer configuration builder.
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
        }
    }

    /// Try to build configuration object from preconfigured sources.
    ///
    /// This method will do all the I/O necessary to load the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if some configuration loading was unsuccessful.
    pub fn build(self) -> Result<ObserversConfig, ObserversConfigError> {
        self.builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Add a custom object implementing [`Source`] trait as a source of observer configuration.
    ///
    /// [`Source`]: config::Source
    pub fn with_source<T>(mut self, source: T) -> Self
    where
        T: config::Source + Send + Sync + 'static,
    {
        self.builder = self.builder.add_source(source);
        self
    }

    /// Add file as a source of observer configuration.
    pub fn with_file(self, name: impl AsRef<str>) -> Self {
        self.with_source(config::File::with_name(name.as_ref()))
    }

    /// Add environment variables as a source of observer configuration.
    pub fn with_env(self, prefix: impl AsRef<str>) -> Self {
        self.with_source(
            config::Environment::with_prefix(prefix.as_ref())
                .separator("_")
                .prefix_separator("__"),
        )
    }
}

impl Default for ObserversConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
