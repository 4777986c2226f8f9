//! Centralized place to re-export dependency crates

pub use config;
pub use inventory;
pub use opentelemetry;
pub use tracing;
