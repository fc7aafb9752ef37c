//! JSON routes file.
//!
//! ```json
//! {
//!   "default_route": "hybrid_smart",
//!   "routes": [
//!     { "name": "hybrid_smart", "stations": ["identity", "skip_trace"],
//!       "budget_limit": 2.0, "seed_fields": ["name", "city", "state"] }
//!   ]
//! }
//! ```

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_budget_limit() -> f64 {
    5.0
}

/// One route as written in the routes file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route name.
    pub name: String,
    /// Station keys, looked up in the catalog, in execution order.
    pub stations: Vec<String>,
    /// Default budget per lead, in dollars.
    #[serde(default = "default_budget_limit")]
    pub budget_limit: f64,
    /// Fields a lead is expected to arrive with. Only used by the ordering
    /// lint.
    #[serde(default)]
    pub seed_fields: Vec<String>,
    /// Free-form description for operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The whole routes file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutesFile {
    /// Route used when a lead does not name one.
    #[serde(default, alias = "default_pipeline", skip_serializing_if = "Option::is_none")]
    pub default_route: Option<String>,
    /// Route definitions.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl RoutesFile {
    /// Parses a routes file from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not match the expected shape.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// Reads and parses a routes file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}
