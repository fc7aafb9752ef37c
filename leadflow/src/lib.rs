//! # Leadflow
//!
//! Budget-bounded lead enrichment.
//!
//! Leadflow runs raw lead records through ordered routes of paid and free
//! enrichment stations, with support for:
//!
//! - **Contract-checked stations**: each station declares its inputs, outputs and cost
//! - **Budget-bounded sequencing**: a lead never spends more than its route allows
//! - **Provider ranking**: interchangeable providers ordered by rolling success and latency
//! - **Dead-letter recovery**: failed leads are kept with their error and can be retried
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leadflow::prelude::*;
//!
//! let registry = RouteRegistry::new();
//! registry.register("identity_only", vec![Arc::new(IdentityStation::new())], 0.0)?;
//!
//! let route = registry.load("identity_only", None)?;
//! let run = PipelineEngine::new().run(lead, &route).await;
//! assert_eq!(run.status(), RunStatus::Enriched);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod dlq;
pub mod engine;
pub mod errors;
pub mod events;
pub mod queue;
pub mod retry;
pub mod router;
pub mod routes;
pub mod stations;
pub mod store;
pub mod telemetry;
pub mod testing;
pub mod worker;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::LeadflowConfig;
    pub use crate::context::{
        HistoryEntry, LeadRecord, PipelineContext, StationOutcome, StopReason,
    };
    pub use crate::dlq::{DeadLetterQueue, DlqCommand, DlqConfig, DlqEntry, RetryAllReport};
    pub use crate::engine::{EngineConfig, PipelineEngine, PipelineRun, RunStatus};
    pub use crate::errors::{
        ConfigError, DlqError, LeadflowError, ProviderError, RouteError, StationError,
        StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::queue::{Delivery, LeadQueue, QueueConfig};
    pub use crate::retry::RetryPolicy;
    pub use crate::router::{ProviderRanking, ProviderRouter, RouterConfig};
    pub use crate::routes::{Route, RouteRegistry, RoutesFile, StationCatalog};
    pub use crate::stations::{
        IdentityStation, ProviderClient, ProviderFallbackStation, Station, StationContract,
        StationOutput, StopCondition,
    };
    pub use crate::store::{InMemoryStore, SharedStore};
    pub use crate::worker::{CancellationToken, Worker, WorkerPool};
}
