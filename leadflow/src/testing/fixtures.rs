//! The reference enrichment route.
//!
//! Seven stations mirroring a production lead route: free identity and
//! scraper steps, then paid skip tracing, line type, DNC and demographics,
//! then a free save.

use serde_json::json;
use std::sync::Arc;

use super::MockStation;
use crate::context::{record_from, LeadRecord, PipelineContext};
use crate::errors::StationError;
use crate::routes::Route;
use crate::stations::{FnStation, IdentityStation, Station, StationContract, StationOutput};

/// Knobs for [`scenario_route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOptions {
    /// Phone skip tracing finds; `None` makes it fail the lead.
    pub skip_trace_phone: Option<String>,
    /// Line type reported for the phone (`voip` ends the route).
    pub line_type: String,
    /// Whether the phone is on the DNC list (ends the route).
    pub on_dnc: bool,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            skip_trace_phone: Some("5551234567".to_string()),
            line_type: "mobile".to_string(),
            on_dnc: false,
        }
    }
}

/// A lead with only a display name.
#[must_use]
pub fn sample_lead() -> LeadRecord {
    record_from([("name", json!("John Smith"))])
}

fn station<F>(contract: StationContract, f: F) -> Arc<dyn Station>
where
    F: Fn(&PipelineContext) -> Result<StationOutput, StationError> + Send + Sync + 'static,
{
    Arc::new(FnStation::new(contract, f))
}

/// Builds the reference route with the given budget.
#[must_use]
pub fn scenario_route(options: &ScenarioOptions, budget: f64) -> Route {
    let phone = options.skip_trace_phone.clone();
    let line_type = options.line_type.clone();
    let on_dnc = options.on_dnc;

    let scraper = Arc::new(MockStation::new(
        StationContract::new("Scraper Lookup")
            .requires(["firstName", "lastName"])
            .produces(["phone"]),
    ));

    let skip_trace = station(
        StationContract::new("Skip-Tracing")
            .produces(["phone", "email"])
            .cost(0.05),
        move |ctx| {
            if ctx.has("phone") {
                return Ok(StationOutput::proceed_empty());
            }
            Ok(phone.as_ref().map_or_else(
                || StationOutput::fail("no phone found"),
                |p| StationOutput::proceed_empty().with_field("phone", p.as_str()),
            ))
        },
    );

    let line_check = station(
        StationContract::new("Line Type Check")
            .requires(["phone"])
            .produces(["line_type"])
            .cost(0.01),
        move |_ctx| {
            let out = StationOutput::proceed_empty().with_field("line_type", line_type.as_str());
            if line_type == "voip" {
                return Ok(StationOutput::skip_remaining(out.fields, "voip line"));
            }
            Ok(out)
        },
    );

    let dnc = station(
        StationContract::new("DNC Check")
            .requires(["phone"])
            .produces(["dnc"])
            .cost(0.02),
        move |_ctx| {
            let out = StationOutput::proceed_empty().with_field("dnc", on_dnc);
            if on_dnc {
                return Ok(StationOutput::skip_remaining(out.fields, "on DNC list"));
            }
            Ok(out)
        },
    );

    let demographics = station(
        StationContract::new("Demographics")
            .produces(["age", "income"])
            .cost(0.03),
        |_ctx| {
            Ok(StationOutput::proceed(record_from([
                ("age", json!(42)),
                ("income", json!("75k-100k")),
            ])))
        },
    );

    let save = station(StationContract::new("Save").produces(["saved"]), |_ctx| {
        Ok(StationOutput::proceed_empty().with_field("saved", true))
    });

    Route::new(
        "hybrid_smart",
        vec![
            Arc::new(IdentityStation::new()),
            scraper,
            skip_trace,
            line_check,
            dnc,
            demographics,
            save,
        ],
        budget,
    )
}
