//! Observer capability contract.

use std::{collections::BTreeMap, sync::Arc};

use crate::{column::ObservedColumn, env::Environment};

/// Boxed error type returned from user observer code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Pluggable reactor bound to exactly one column after initialization.
///
/// Instances are never shared concurrently: an instance is owned either by the pool or by exactly
/// one caller that checked it out.
pub trait Observer: Send {
    /// Initialize freshly constructed observer.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the observer cannot be used. Such instance is discarded without closing.
    fn init(&mut self, ctx: &ObserverContext) -> Result<(), BoxError>;

    /// Column this observer is bound to.
    fn observed_column(&self) -> ObservedColumn;

    /// Release any resources held by the observer.
    ///
    /// Called at most once, when the pool shuts down.
    ///
    /// # Errors
    ///
    /// Returns `Err` on cleanup failure. The error is logged and otherwise ignored.
    fn close(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Context passed to [`Observer::init`].
#[derive(Clone, Debug)]
pub struct ObserverContext {
    env: Arc<Environment>,
    parameters: BTreeMap<String, String>,
}

impl ObserverContext {
    /// Bundle environment and configured observer parameters.
    pub fn new(env: Arc<Environment>, parameters: BTreeMap<String, String>) -> Self {
        Self { env, parameters }
    }

    /// Shared environment.
    #[must_use]
    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// All parameters configured for this observer.
    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Single configured parameter.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Single application configuration parameter.
    #[must_use]
    pub fn app_param(&self, name: &str) -> Option<&str> {
        self.env.app_param(name)
    }
}
