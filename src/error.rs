//! Error types and error support code.

use crate::{column::Column, observer::BoxError};

/// Observer type could not be resolved or constructed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// No factory registered for the configured type tag.
    #[error("unknown observer type {type_id:?} configured for column {column}")]
    UnknownType {
        /// Configured type tag.
        type_id: String,
        /// Column the observer was configured for.
        column: Column,
    },
    /// Factory failed to produce an instance.
    #[error("unable to construct observer {type_id:?} for column {column}: {source}")]
    Construct {
        /// Configured type tag.
        type_id: String,
        /// Column the observer was configured for.
        column: Column,
        /// Factory error.
        #[source]
        source: BoxError,
    },
}

/// Error type used by observer pools.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Observer type could not be resolved or constructed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Observer initialization code failed.
    #[error("observer {type_id:?} failed to initialize for column {column}: {source}")]
    Initialization {
        /// Configured type tag.
        type_id: String,
        /// Column the observer was configured for.
        column: Column,
        /// Error returned from initialization.
        #[source]
        source: BoxError,
    },
    /// Initialized observer reports a column different from the one it was configured for.
    #[error(
        "mismatch between configured column {requested} and column {reported} reported by observer {type_id:?}"
    )]
    Consistency {
        /// Configured type tag.
        type_id: String,
        /// Column the observer was configured for.
        requested: Column,
        /// Column reported by the observer itself.
        reported: Column,
    },
    /// Observer failed to close.
    #[error("failed to close observer for column {column}: {source}")]
    Cleanup {
        /// Column reported by the observer.
        column: Column,
        /// Error returned from close.
        #[source]
        source: BoxError,
    },
    /// Pool was already shut down.
    #[error("observer pool is closed")]
    PoolClosed,
}
