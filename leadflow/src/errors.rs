//! Error types for the leadflow engine.
//!
//! Contract violations and budget stops are not errors: they are recorded as
//! station outcomes in the run history. Everything here is either fatal for a
//! single lead (`StationError`) or an operator-facing failure of the
//! surrounding infrastructure (routes, store, DLQ, config).

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The umbrella error type for leadflow operations.
#[derive(Debug, Error)]
pub enum LeadflowError {
    /// A route could not be registered or loaded.
    #[error("{0}")]
    Route(#[from] RouteError),

    /// The shared store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A dead-letter queue operation failed.
    #[error("{0}")]
    Dlq(#[from] DlqError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a station's `process` call.
///
/// Any of these terminates the lead with a `FAIL` and routes it to the DLQ.
#[derive(Debug, Error)]
pub enum StationError {
    /// The station's work failed.
    #[error("Station '{station}' failed: {reason}")]
    Execution {
        /// The station name.
        station: String,
        /// Why it failed.
        reason: String,
    },

    /// The station's external call exceeded its timeout.
    #[error("Station '{station}' timed out after {}ms", after.as_millis())]
    Timeout {
        /// The station name.
        station: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// Every interchangeable provider for a capability failed.
    #[error("No provider available for '{capability}' (attempted: {})", attempted.join(", "))]
    ProviderUnavailable {
        /// The capability being looked up (e.g. "people_search").
        capability: String,
        /// Providers tried, in order.
        attempted: Vec<String>,
    },

    /// The provider rejected the call with a rate limit or quota error.
    #[error("Provider '{provider}' rate limited the request")]
    RateLimited {
        /// The provider name.
        provider: String,
        /// Suggested wait before retrying, if the provider sent one.
        retry_after: Option<Duration>,
    },

    /// Any other failure surfaced from inside a station.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StationError {
    /// Creates an execution error.
    #[must_use]
    pub fn execution(station: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Execution {
            station: station.into(),
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(station: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            station: station.into(),
            after,
        }
    }

    /// Creates a provider-unavailable error.
    #[must_use]
    pub fn provider_unavailable(capability: impl Into<String>, attempted: Vec<String>) -> Self {
        Self::ProviderUnavailable {
            capability: capability.into(),
            attempted,
        }
    }

    /// Returns the short type name used in history and DLQ records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execution { .. } => "StationExecutionError",
            Self::Timeout { .. } => "StationTimeout",
            Self::ProviderUnavailable { .. } => "ProviderUnavailable",
            Self::RateLimited { .. } => "RateLimited",
            Self::Other(_) => "StationError",
        }
    }

    /// Returns true when a later retry of the lead may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        // Every station failure is retryable through the DLQ; the distinction
        // only matters for in-station retries.
        !matches!(self, Self::Execution { .. } | Self::Other(_))
    }
}

/// Errors returned by a single provider call.
///
/// These never leave the station that made the call: the fallback station
/// records them against the provider and moves on to the next one.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider answered with a rate limit or quota response.
    #[error("rate limited")]
    RateLimited {
        /// Suggested wait before retrying, if the provider sent one.
        retry_after: Option<Duration>,
    },

    /// The provider did not answer within the call timeout.
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The provider blocked the request (captcha wall, 403).
    #[error("blocked: {0}")]
    Blocked(String),

    /// The provider failed for any other reason.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Returns true for rate limit responses, the only kind retried in place.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Errors raised when registering or loading routes.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    /// No route with the requested name exists.
    #[error("Route '{name}' not found. Available: {}", available.join(", "))]
    UnknownRoute {
        /// The requested route.
        name: String,
        /// The registered routes.
        available: Vec<String>,
    },

    /// A station reference is not in the allow-list.
    #[error("Station '{key}' is not an allowed station (route '{route}')")]
    UnknownStation {
        /// The route being built.
        route: String,
        /// The rejected station key.
        key: String,
    },

    /// Two stations in one route share a name.
    #[error("Station name '{station}' appears twice in route '{route}'")]
    DuplicateStation {
        /// The route being built.
        route: String,
        /// The duplicated station name.
        station: String,
    },

    /// The budget is negative or not a finite number.
    #[error("Invalid budget {budget} for route '{route}'")]
    InvalidBudget {
        /// The route being built.
        route: String,
        /// The rejected budget.
        budget: f64,
    },

    /// The route name is empty or whitespace-only.
    #[error("Route name cannot be empty or whitespace-only")]
    EmptyName,
}

/// Errors from the shared key-value/hash store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A stored value could not be parsed.
    #[error("Corrupt value at '{key}': {reason}")]
    Corrupt {
        /// The key holding the value.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Redis client error.
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors from dead-letter queue operations.
#[derive(Debug, Error)]
pub enum DlqError {
    /// No entry exists at the requested index.
    #[error("DLQ entry not found at index {index}")]
    NotFound {
        /// The requested index.
        index: usize,
    },

    /// The underlying store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// An entry could not be encoded or decoded.
    #[error("DLQ serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DlqError {
    /// Converts to a JSON object for the admin surface.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        let kind = match self {
            Self::NotFound { index } => {
                map.insert("index".to_string(), json!(index));
                "NotFound"
            }
            Self::Store(_) => "StoreError",
            Self::Serialization(_) => "SerializationError",
        };
        map.insert("type".to_string(), json!(kind));
        map.insert("message".to_string(), json!(self.to_string()));
        map
    }
}

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config '{path}': {source}")]
    Read {
        /// The config path.
        path: String,
        /// The IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for the expected shape.
    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        /// The config path.
        path: String,
        /// The parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An environment override had an unusable value.
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv {
        /// The environment variable.
        var: String,
        /// The rejected value.
        value: String,
    },
}
