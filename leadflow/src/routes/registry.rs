//! Route registry with validation and hot reload.

use super::{Route, RouteConfig, RoutesFile, StationCatalog};
use crate::errors::{LeadflowError, RouteError};
use crate::stations::Station;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

/// A station whose required inputs nothing upstream provides.
///
/// Not an error: leads may carry the field anyway. At run time the station
/// would be skipped with a contract violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingWarning {
    /// The station.
    pub station: String,
    /// Inputs neither seeded nor produced by an earlier station.
    pub unprovided: Vec<String>,
}

#[derive(Clone)]
struct RouteDefinition {
    stations: Vec<Arc<dyn Station>>,
    default_budget: f64,
}

#[derive(Default)]
struct RegistryState {
    routes: BTreeMap<String, RouteDefinition>,
    default_route: Option<String>,
}

/// Named routes, shared by every worker.
///
/// Routes can be replaced at run time with [`reload`](Self::reload) without
/// disturbing runs that already loaded a [`Route`].
#[derive(Default)]
pub struct RouteRegistry {
    state: RwLock<RegistryState>,
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("RouteRegistry")
            .field("routes", &state.routes.keys().collect::<Vec<_>>())
            .field("default_route", &state.default_route)
            .finish()
    }
}

fn check_budget(route: &str, budget: f64) -> Result<(), RouteError> {
    if budget.is_finite() && budget >= 0.0 {
        Ok(())
    } else {
        Err(RouteError::InvalidBudget {
            route: route.to_string(),
            budget,
        })
    }
}

fn validate(
    name: &str,
    stations: &[Arc<dyn Station>],
    default_budget: f64,
) -> Result<(), RouteError> {
    if name.trim().is_empty() {
        return Err(RouteError::EmptyName);
    }
    check_budget(name, default_budget)?;

    let mut seen = HashSet::new();
    for station in stations {
        if !seen.insert(station.name()) {
            return Err(RouteError::DuplicateStation {
                route: name.to_string(),
                station: station.name().to_string(),
            });
        }
    }
    Ok(())
}

fn build_definition(
    config: &RouteConfig,
    catalog: &StationCatalog,
) -> Result<RouteDefinition, RouteError> {
    let stations = config
        .stations
        .iter()
        .map(|key| catalog.build(&config.name, key))
        .collect::<Result<Vec<_>, _>>()?;
    validate(&config.name, &stations, config.budget_limit)?;

    let seed: BTreeSet<String> = config.seed_fields.iter().cloned().collect();
    log_ordering(&config.name, &RouteRegistry::lint_order(&stations, &seed));

    Ok(RouteDefinition {
        stations,
        default_budget: config.budget_limit,
    })
}

fn log_ordering(route: &str, warnings: &[OrderingWarning]) {
    for warning in warnings {
        tracing::warn!(
            route = %route,
            station = %warning.station,
            unprovided = ?warning.unprovided,
            "Station inputs are not produced upstream"
        );
    }
}

impl RouteRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a routes file.
    ///
    /// # Errors
    ///
    /// Returns the first route error found; nothing is registered then.
    pub fn from_file(file: &RoutesFile, catalog: &StationCatalog) -> Result<Self, RouteError> {
        let registry = Self::new();
        registry.reload(file, catalog)?;
        Ok(registry)
    }

    /// Registers (or replaces) a route.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty name, a negative or non-finite budget,
    /// or two stations sharing a name.
    pub fn register(
        &self,
        name: impl Into<String>,
        stations: Vec<Arc<dyn Station>>,
        default_budget: f64,
    ) -> Result<(), RouteError> {
        let name = name.into();
        validate(&name, &stations, default_budget)?;
        log_ordering(&name, &Self::lint_order(&stations, &BTreeSet::new()));

        tracing::info!(
            route = %name,
            stations = stations.len(),
            budget = default_budget,
            "Registered route"
        );
        self.state.write().routes.insert(
            name,
            RouteDefinition {
                stations,
                default_budget,
            },
        );
        Ok(())
    }

    /// Registers a route from its file form.
    ///
    /// # Errors
    ///
    /// Returns an error if a station key is not in the catalog or the route
    /// fails validation.
    pub fn register_config(
        &self,
        config: &RouteConfig,
        catalog: &StationCatalog,
    ) -> Result<(), RouteError> {
        let definition = build_definition(config, catalog)?;
        tracing::info!(
            route = %config.name,
            stations = definition.stations.len(),
            budget = definition.default_budget,
            "Registered route"
        );
        self.state
            .write()
            .routes
            .insert(config.name.clone(), definition);
        Ok(())
    }

    /// Replaces every route with the contents of `file`.
    ///
    /// All routes are built before any is swapped in, so a bad file leaves
    /// the current routes untouched. Returns the number of routes loaded.
    ///
    /// # Errors
    ///
    /// Returns the first route error, or [`RouteError::UnknownRoute`] if the
    /// default route is not among the loaded routes.
    pub fn reload(&self, file: &RoutesFile, catalog: &StationCatalog) -> Result<usize, RouteError> {
        let mut routes = BTreeMap::new();
        for config in &file.routes {
            if routes.contains_key(&config.name) {
                tracing::warn!(route = %config.name, "Route defined twice, last one wins");
            }
            routes.insert(config.name.clone(), build_definition(config, catalog)?);
        }

        if let Some(default) = &file.default_route {
            if !routes.contains_key(default) {
                return Err(RouteError::UnknownRoute {
                    name: default.clone(),
                    available: routes.keys().cloned().collect(),
                });
            }
        }

        let count = routes.len();
        *self.state.write() = RegistryState {
            routes,
            default_route: file.default_route.clone(),
        };
        tracing::info!(routes = count, default_route = ?file.default_route, "Routes loaded");
        Ok(count)
    }

    /// Reads a routes file and replaces every route with its contents.
    ///
    /// # Errors
    ///
    /// Returns a config error if the file cannot be read or parsed, or a
    /// route error as for [`reload`](Self::reload).
    pub fn reload_from_path(
        &self,
        path: impl AsRef<Path>,
        catalog: &StationCatalog,
    ) -> Result<usize, LeadflowError> {
        let file = RoutesFile::from_path(path)?;
        Ok(self.reload(&file, catalog)?)
    }

    /// Returns a runnable copy of a route. `budget_override` replaces the
    /// route's default budget, including an override of zero.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownRoute`] if no such route exists, or
    /// [`RouteError::InvalidBudget`] for a negative or non-finite override.
    pub fn load(&self, name: &str, budget_override: Option<f64>) -> Result<Route, RouteError> {
        let state = self.state.read();
        let definition = state
            .routes
            .get(name)
            .ok_or_else(|| RouteError::UnknownRoute {
                name: name.to_string(),
                available: state.routes.keys().cloned().collect(),
            })?;

        let budget = match budget_override {
            Some(budget) => {
                check_budget(name, budget)?;
                budget
            }
            None => definition.default_budget,
        };

        Ok(Route::new(name, definition.stations.clone(), budget))
    }

    /// Loads the default route.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownRoute`] if no default is set.
    pub fn load_default(&self, budget_override: Option<f64>) -> Result<Route, RouteError> {
        let name = self.default_route().ok_or_else(|| RouteError::UnknownRoute {
            name: "<default>".to_string(),
            available: self.route_names(),
        })?;
        self.load(&name, budget_override)
    }

    /// Sets the default route.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownRoute`] if the route is not registered.
    pub fn set_default_route(&self, name: &str) -> Result<(), RouteError> {
        let mut state = self.state.write();
        if !state.routes.contains_key(name) {
            return Err(RouteError::UnknownRoute {
                name: name.to_string(),
                available: state.routes.keys().cloned().collect(),
            });
        }
        state.default_route = Some(name.to_string());
        Ok(())
    }

    /// Returns the default route name, if set.
    #[must_use]
    pub fn default_route(&self) -> Option<String> {
        self.state.read().default_route.clone()
    }

    /// Returns the registered route names, sorted.
    #[must_use]
    pub fn route_names(&self) -> Vec<String> {
        self.state.read().routes.keys().cloned().collect()
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.state.read().routes.contains_key(name)
    }

    /// Finds stations whose required inputs are neither in `seed_fields` nor
    /// produced by an earlier station.
    #[must_use]
    pub fn lint_order(
        stations: &[Arc<dyn Station>],
        seed_fields: &BTreeSet<String>,
    ) -> Vec<OrderingWarning> {
        let mut available: BTreeSet<&str> = seed_fields.iter().map(String::as_str).collect();
        let mut warnings = Vec::new();

        for station in stations {
            let contract = station.contract();
            let unprovided: Vec<String> = contract
                .required_inputs
                .iter()
                .filter(|field| !available.contains(field.as_str()))
                .cloned()
                .collect();
            if !unprovided.is_empty() {
                warnings.push(OrderingWarning {
                    station: contract.name.clone(),
                    unprovided,
                });
            }
            available.extend(contract.produces_outputs.iter().map(String::as_str));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::{IdentityStation, NoOpStation, StationContract};
    use crate::testing::MockStation;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn noop(name: &str) -> Arc<dyn Station> {
        Arc::new(NoOpStation::new(name))
    }

    fn catalog() -> StationCatalog {
        let mut catalog = StationCatalog::with_builtins();
        catalog.register("skip_trace", || {
            Arc::new(MockStation::new(
                StationContract::new("Skip-Tracing")
                    .requires(["firstName", "lastName", "city", "state"])
                    .produces(["phone"])
                    .cost(0.05),
            )) as Arc<dyn Station>
        });
        catalog
    }

    #[test]
    fn test_register_and_load() {
        let registry = RouteRegistry::new();
        registry
            .register("free_only", vec![noop("a"), noop("b")], 0.0)
            .unwrap();

        let route = registry.load("free_only", None).unwrap();
        assert_eq!(route.name(), "free_only");
        assert_eq!(route.len(), 2);
        assert_eq!(route.budget_limit(), 0.0);
        assert_eq!(registry.route_names(), vec!["free_only".to_string()]);
    }

    #[test]
    fn test_budget_override_including_zero() {
        let registry = RouteRegistry::new();
        registry.register("r", vec![noop("a")], 2.0).unwrap();

        assert_eq!(registry.load("r", Some(0.5)).unwrap().budget_limit(), 0.5);
        assert_eq!(registry.load("r", Some(0.0)).unwrap().budget_limit(), 0.0);
        assert!(matches!(
            registry.load("r", Some(-1.0)),
            Err(RouteError::InvalidBudget { .. })
        ));
    }

    #[test]
    fn test_unknown_route_lists_available() {
        let registry = RouteRegistry::new();
        registry.register("paid_only", vec![], 1.0).unwrap();

        match registry.load("nope", None).unwrap_err() {
            RouteError::UnknownRoute { name, available } => {
                assert_eq!(name, "nope");
                assert_eq!(available, vec!["paid_only".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_registration_validation() {
        let registry = RouteRegistry::new();
        assert!(matches!(
            registry.register("  ", vec![], 1.0),
            Err(RouteError::EmptyName)
        ));
        assert!(matches!(
            registry.register("r", vec![], f64::INFINITY),
            Err(RouteError::InvalidBudget { .. })
        ));
        assert!(matches!(
            registry.register("r", vec![noop("dup"), noop("dup")], 1.0),
            Err(RouteError::DuplicateStation { .. })
        ));
        assert!(registry.route_names().is_empty());
    }

    #[test]
    fn test_loaded_routes_share_station_instances() {
        let registry = RouteRegistry::new();
        registry.register("r", vec![noop("a")], 1.0).unwrap();

        let first = registry.load("r", None).unwrap();
        let second = registry.load("r", None).unwrap();
        assert!(Arc::ptr_eq(&first.stations()[0], &second.stations()[0]));
    }

    #[test]
    fn test_register_config_rejects_unknown_station() {
        let registry = RouteRegistry::new();
        let config = RouteConfig {
            name: "r".to_string(),
            stations: vec!["identity".to_string(), "os.system".to_string()],
            budget_limit: 1.0,
            seed_fields: vec![],
            description: None,
        };

        assert!(matches!(
            registry.register_config(&config, &catalog()),
            Err(RouteError::UnknownStation { .. })
        ));
        assert!(!registry.contains("r"));
    }

    #[test]
    fn test_lint_order() {
        let stations: Vec<Arc<dyn Station>> = vec![
            Arc::new(IdentityStation::new()),
            Arc::new(MockStation::new(
                StationContract::new("Skip-Tracing").requires(["firstName", "city"]),
            )),
        ];
        let seed: BTreeSet<String> = ["name".to_string()].into_iter().collect();

        let warnings = RouteRegistry::lint_order(&stations, &seed);
        assert_eq!(
            warnings,
            vec![OrderingWarning {
                station: "Skip-Tracing".to_string(),
                unprovided: vec!["city".to_string()],
            }]
        );
    }

    #[test]
    fn test_reload_is_all_or_nothing() {
        let catalog = catalog();
        let good = RoutesFile::from_json(
            r#"{
                "default_route": "hybrid_smart",
                "routes": [
                    {"name": "hybrid_smart", "stations": ["identity", "skip_trace"], "budget_limit": 2.0,
                     "seed_fields": ["name", "city", "state"]}
                ]
            }"#,
        )
        .unwrap();
        let registry = RouteRegistry::from_file(&good, &catalog).unwrap();
        assert_eq!(registry.default_route().as_deref(), Some("hybrid_smart"));

        let bad = RoutesFile::from_json(
            r#"{"routes": [{"name": "other", "stations": ["missing_station"]}]}"#,
        )
        .unwrap();
        assert!(registry.reload(&bad, &catalog).is_err());
        assert_eq!(registry.route_names(), vec!["hybrid_smart".to_string()]);

        let bad_default = RoutesFile::from_json(
            r#"{"default_route": "ghost", "routes": [{"name": "a", "stations": []}]}"#,
        )
        .unwrap();
        assert!(registry.reload(&bad_default, &catalog).is_err());
        assert!(registry.contains("hybrid_smart"));
    }

    #[test]
    fn test_reload_from_path_and_default() {
        let catalog = catalog();
        let registry = RouteRegistry::new();
        registry.register("old", vec![], 1.0).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"default_pipeline": "free_only", "routes": [{{"name": "free_only", "stations": ["identity"], "budget_limit": 0.0}}]}}"#
        )
        .unwrap();

        assert_eq!(registry.reload_from_path(file.path(), &catalog).unwrap(), 1);
        assert!(!registry.contains("old"));

        let route = registry.load_default(None).unwrap();
        assert_eq!(route.name(), "free_only");
        assert_eq!(route.stations()[0].name(), IdentityStation::NAME);

        assert!(matches!(
            registry.reload_from_path("/no/such/routes.json", &catalog),
            Err(LeadflowError::Config(_))
        ));
    }

    #[test]
    fn test_set_default_route() {
        let registry = RouteRegistry::new();
        assert!(registry.load_default(None).is_err());
        registry.register("a", vec![], 1.0).unwrap();

        assert!(registry.set_default_route("b").is_err());
        registry.set_default_route("a").unwrap();
        assert_eq!(registry.load_default(Some(3.0)).unwrap().budget_limit(), 3.0);
    }
}
