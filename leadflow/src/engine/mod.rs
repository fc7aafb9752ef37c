//! The linear pipeline engine.
//!
//! Runs one lead through one route: contract check, budget check, invoke,
//! merge, charge, record, branch. Stations run strictly in route order and
//! nothing runs after the stop reason is set.

mod result;
mod runner;

#[cfg(test)]
mod integration_tests;

pub use result::{PipelineRun, RunStatus};
pub use runner::{EngineConfig, PipelineEngine};
