//! The allow-list of stations a route may reference.

use crate::errors::RouteError;
use crate::stations::{IdentityStation, Station};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh station instance.
pub type StationFactory = Arc<dyn Fn() -> Arc<dyn Station> + Send + Sync>;

/// Maps station keys used in routes files to factories.
///
/// Only keys registered here can appear in a route.
#[derive(Clone, Default)]
pub struct StationCatalog {
    factories: BTreeMap<String, StationFactory>,
}

impl fmt::Debug for StationCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationCatalog")
            .field("keys", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StationCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the stations that ship with the crate.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("identity", || Arc::new(IdentityStation::new()) as Arc<dyn Station>);
        catalog
    }

    /// Registers a factory under `key`, replacing any previous one.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Station> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::debug!(key = %key, "Replaced station factory");
        }
        self
    }

    /// Builds the station for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownStation`] if `key` is not registered.
    pub fn build(&self, route: &str, key: &str) -> Result<Arc<dyn Station>, RouteError> {
        self.factories
            .get(key)
            .map(|factory| factory())
            .ok_or_else(|| RouteError::UnknownStation {
                route: route.to_string(),
                key: key.to_string(),
            })
    }

    /// Returns true if `key` is allowed.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Returns the registered keys in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
