//! Registry of observer constructors, keyed by type tag.

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    column::Column,
    env::{Environment, Resolved},
    error::{ConfigurationError, Error},
    observer::{BoxError, Observer, ObserverContext},
};

/// Shared observer constructor.
pub type ObserverFactory = Arc<dyn Fn() -> Result<Box<dyn Observer>, BoxError> + Send + Sync>;

/// Link-time observer registration.
///
/// Using [`crate::register_observer`] macro will create one of these and submit it using
/// [`inventory::submit!`].
pub struct ObserverRegistration {
    type_id: &'static str,
    factory: fn() -> Result<Box<dyn Observer>, BoxError>,
}

impl ObserverRegistration {
    /// Create registration record.
    pub const fn new(
        type_id: &'static str,
        factory: fn() -> Result<Box<dyn Observer>, BoxError>,
    ) -> Self {
        Self { type_id, factory }
    }

    /// Registered type tag.
    #[must_use]
    pub fn type_id(&self) -> &'static str {
        self.type_id
    }
}

// All observers registered with `register_observer!` are collected here before `main()` runs.
// For more info see documentation on [`inventory`] crate.
inventory::collect!(ObserverRegistration);

/// Register an observer type under a tag, so that [`ObserverFactories::from_inventory`] can
/// construct it.
///
/// The type must implement [`Observer`] and [`Default`].
///
/// ```rust,ignore
/// observer_pool::register_observer!("word-count", WordCountObserver);
/// ```
#[macro_export]
macro_rules! register_observer {
    ($type_id:expr, $ty:ty) => {
        const _: () = {
            fn __construct_observer() -> ::std::result::Result<
                ::std::boxed::Box<dyn $crate::Observer>,
                $crate::BoxError,
            > {
                ::std::result::Result::Ok(::std::boxed::Box::new(
                    <$ty as ::std::default::Default>::default(),
                ))
            }
            $crate::reexport::inventory::submit! {
                $crate::ObserverRegistration::new($type_id, __construct_observer)
            }
        };
    };
}

/// Mapping from type tag to observer constructor.
#[derive(Clone, Default)]
pub struct ObserverFactories {
    factories: HashMap<String, ObserverFactory>,
}

impl fmt::Debug for ObserverFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.factories.keys().collect();
        tags.sort();
        f.debug_struct("ObserverFactories").field("types", &tags).finish()
    }
}

impl ObserverFactories {
    /// Create empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create registry from all observers registered with [`crate::register_observer`].
    #[must_use]
    pub fn from_inventory() -> Self {
        let mut factories = Self::new();
        for reg in inventory::iter::<ObserverRegistration> {
            let factory = reg.factory;
            factories.register(reg.type_id, move || factory());
        }
        factories
    }

    /// Register observer constructor under a type tag.
    ///
    /// Replaces previous constructor registered under the same tag.
    pub fn register<F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Observer>, BoxError> + Send + Sync + 'static,
    {
        let type_id = type_id.into();
        debug!(type_id = %type_id, "registering observer type");
        if self
            .factories
            .insert(type_id.clone(), Arc::new(factory))
            .is_some()
        {
            warn!(type_id = %type_id, "observer type registered more than once, replacing");
        }
        self
    }

    /// Check if a type tag is registered.
    #[must_use]
    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Construct, initialize and validate an observer for a column.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the type tag is not registered or the constructor
    /// fails, [`Error::Initialization`] if [`Observer::init`] fails, and [`Error::Consistency`] if
    /// the new observer reports a column other than `column`. Failed instances are dropped
    /// without being closed.
    pub fn instantiate(
        &self,
        column: &Column,
        resolved: Resolved<'_>,
        env: &Arc<Environment>,
    ) -> Result<Box<dyn Observer>, Error> {
        let type_id = &resolved.config.type_id;
        let factory = self
            .factories
            .get(type_id)
            .ok_or_else(|| ConfigurationError::UnknownType {
                type_id: type_id.clone(),
                column: column.clone(),
            })?;
        let mut observer = factory().map_err(|source| ConfigurationError::Construct {
            type_id: type_id.clone(),
            column: column.clone(),
            source,
        })?;
        let ctx = ObserverContext::new(env.clone(), resolved.config.parameters.clone());
        observer.init(&ctx).map_err(|source| Error::Initialization {
            type_id: type_id.clone(),
            column: column.clone(),
            source,
        })?;
        let reported = observer.observed_column().column;
        if reported != *column {
            return Err(Error::Consistency {
                type_id: type_id.clone(),
                requested: column.clone(),
                reported,
            });
        }
        debug!(%column, type_id = %type_id, kind = resolved.kind.as_str(), "observer constructed");
        Ok(observer)
    }
}
