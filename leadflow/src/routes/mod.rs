//! Named routes: ordered station lists with a default budget.
//!
//! Stations are only ever built from the [`StationCatalog`] allow-list, so a
//! routes file can reorder and combine known stations but never load code.

mod catalog;
mod config;
mod registry;

pub use catalog::{StationCatalog, StationFactory};
pub use config::{RouteConfig, RoutesFile};
pub use registry::{OrderingWarning, RouteRegistry};

use crate::stations::Station;
use std::fmt;
use std::sync::Arc;

/// A runnable route: stations in order plus the budget for one lead.
#[derive(Clone)]
pub struct Route {
    name: String,
    stations: Vec<Arc<dyn Station>>,
    budget_limit: f64,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field(
                "stations",
                &self.stations.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("budget_limit", &self.budget_limit)
            .finish()
    }
}

impl Route {
    /// Creates a route without registry validation.
    #[must_use]
    pub fn new(name: impl Into<String>, stations: Vec<Arc<dyn Station>>, budget_limit: f64) -> Self {
        Self {
            name: name.into(),
            stations,
            budget_limit,
        }
    }

    /// Route name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stations in execution order.
    #[must_use]
    pub fn stations(&self) -> &[Arc<dyn Station>] {
        &self.stations
    }

    /// Budget for one lead, in dollars.
    #[must_use]
    pub const fn budget_limit(&self) -> f64 {
        self.budget_limit
    }

    /// Number of stations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// True when the route has no stations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Sum of every station's cost estimate.
    #[must_use]
    pub fn max_cost(&self) -> f64 {
        self.stations
            .iter()
            .map(|s| s.contract().cost_estimate)
            .sum()
    }
}
