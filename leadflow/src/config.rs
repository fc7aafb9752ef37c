//! Service configuration.
//!
//! Loaded from a JSON file, then overridden from the environment. Every
//! field has a default, so an empty object is a valid config.

use crate::dlq::DlqConfig;
use crate::engine::EngineConfig;
use crate::errors::ConfigError;
use crate::queue::QueueConfig;
use crate::router::RouterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level settings for a leadflow deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadflowConfig {
    /// Shared store connection string.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Ingestion queue.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Dead-letter queue.
    #[serde(default)]
    pub dlq: DlqConfig,
    /// Provider router.
    #[serde(default)]
    pub router: RouterConfig,
    /// Pipeline engine.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Number of queue consumers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Routes file, if routes are not registered in code.
    #[serde(default)]
    pub routes_path: Option<PathBuf>,
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON log lines.
    #[serde(default)]
    pub log_json: bool,
}

impl Default for LeadflowConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            queue: QueueConfig::default(),
            dlq: DlqConfig::default(),
            router: RouterConfig::default(),
            engine: EngineConfig::default(),
            workers: default_workers(),
            routes_path: None,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl LeadflowConfig {
    /// Parses a config from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not a valid config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    /// Reads a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    /// Applies overrides from the process environment.
    ///
    /// `REDIS_URL` (or `APP_REDIS_URL`) sets the store, `LEADFLOW_WORKERS`
    /// the worker count and `LEADFLOW_LOG` the log filter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a worker count that is not a
    /// positive integer.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Applies overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// As for [`apply_env`](Self::apply_env).
    pub fn apply_vars<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("REDIS_URL").or_else(|| var("APP_REDIS_URL")) {
            self.redis_url = url;
        }

        if let Some(raw) = var("LEADFLOW_WORKERS") {
            self.workers = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidEnv {
                    var: "LEADFLOW_WORKERS".to_string(),
                    value: raw,
                })?;
        }

        if let Some(level) = var("LEADFLOW_LOG") {
            self.log_level = level;
        }
        Ok(())
    }
}
