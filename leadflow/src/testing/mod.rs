//! Testing utilities for leadflow routes.
//!
//! This module provides:
//! - A configurable mock station
//! - The reference enrichment route used throughout the tests
//! - Assertions over pipeline runs
//! - A shared store that fails on demand

mod assertions;
mod fixtures;
mod mocks;
mod store;

pub use assertions::{
    assert_fields_absent, assert_fields_present, assert_outcomes, assert_stop_reason,
};
pub use fixtures::{sample_lead, scenario_route, ScenarioOptions};
pub use mocks::MockStation;
pub use store::{FaultyStore, PushHook};
