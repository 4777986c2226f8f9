//! Observer configuration registries.

use std::collections::{BTreeMap, HashMap};

use crate::{
    column::{Column, NotificationType},
    config::{ObserverConfig, ObserverEntry, ObserversConfig, ObserversConfigError},
};

/// Environment shared by all observers.
///
/// Holds two configuration registries: primary (strong observers) and fallback (weak
/// observers), both keyed by column, and application-wide parameters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Environment {
    primary: HashMap<Column, ObserverConfig>,
    fallback: HashMap<Column, ObserverConfig>,
    app: BTreeMap<String, String>,
}

/// Observer configuration found for a column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolved<'a> {
    /// Observer configuration.
    pub config: &'a ObserverConfig,
    /// Registry the configuration was found in.
    pub kind: NotificationType,
}

impl Environment {
    /// Create empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add observer to primary registry, replacing any previous one for the column.
    #[must_use]
    pub fn with_observer(mut self, column: Column, config: ObserverConfig) -> Self {
        self.primary.insert(column, config);
        self
    }

    /// Add observer to fallback registry, replacing any previous one for the column.
    #[must_use]
    pub fn with_weak_observer(mut self, column: Column, config: ObserverConfig) -> Self {
        self.fallback.insert(column, config);
        self
    }

    /// Set application parameter.
    #[must_use]
    pub fn with_app_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.app.insert(key.into(), value.into());
        self
    }

    /// Find observer configuration for a column.
    ///
    /// Primary registry takes precedence over fallback.
    #[must_use]
    pub fn resolve(&self, column: &Column) -> Option<Resolved<'_>> {
        if let Some(config) = self.primary.get(column) {
            return Some(Resolved {
                config,
                kind: NotificationType::Strong,
            });
        }
        self.fallback.get(column).map(|config| Resolved {
            config,
            kind: NotificationType::Weak,
        })
    }

    /// Iterate over all configured columns.
    ///
    /// Columns present in both registries are reported once, as strong.
    pub fn observed_columns(&self) -> impl Iterator<Item = (&Column, NotificationType)> + '_ {
        let strong = self.primary.keys().map(|col| (col, NotificationType::Strong));
        let weak = self
            .fallback
            .keys()
            .filter(|col| !self.primary.contains_key(*col))
            .map(|col| (col, NotificationType::Weak));
        strong.chain(weak)
    }

    /// Application parameter.
    #[must_use]
    pub fn app_param(&self, key: &str) -> Option<&str> {
        self.app.get(key).map(String::as_str)
    }

    /// All application parameters.
    #[must_use]
    pub fn app_params(&self) -> &BTreeMap<String, String> {
        &self.app
    }
}

fn collect_registry(
    entries: Vec<ObserverEntry>,
    registry: &'static str,
) -> Result<HashMap<Column, ObserverConfig>, ObserversConfigError> {
    let mut map = HashMap::with_capacity(entries.len());
    for ObserverEntry { column, config } in entries {
        if map.contains_key(&column) {
            return Err(ObserversConfigError::DuplicateColumn { column, registry });
        }
        map.insert(column, config);
    }
    Ok(map)
}

impl TryFrom<ObserversConfig> for Environment {
    type Error = ObserversConfigError;

    fn try_from(value: ObserversConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            primary: collect_registry(value.observers, "primary")?,
            fallback: collect_registry(value.weak_observers, "fallback")?,
            app: value.app,
        })
    }
}
