//! Column identity and observed column descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a watched column.
///
/// Used as the sole key for configuration lookup and free list selection.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Column {
    /// Column family.
    pub family: String,
    /// Column qualifier.
    #[serde(default)]
    pub qualifier: String,
}

impl Column {
    /// Create new column identity.
    pub fn new(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.qualifier)
    }
}

/// How an observer gets notified about changes.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// Configured in the primary registry.
    #[default]
    Strong,
    /// Configured in the fallback registry.
    Weak,
}

impl NotificationType {
    /// Short lowercase name, suitable for labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Weak => "weak",
        }
    }
}

/// Column an observer instance reports as its own.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ObservedColumn {
    /// Watched column.
    pub column: Column,
    /// Notification type.
    pub kind: NotificationType,
}

impl ObservedColumn {
    /// Observed column with strong notifications.
    pub fn strong(column: Column) -> Self {
        Self {
            column,
            kind: NotificationType::Strong,
        }
    }

    /// Observed column with weak notifications.
    pub fn weak(column: Column) -> Self {
        Self {
            column,
            kind: NotificationType::Weak,
        }
    }
}
