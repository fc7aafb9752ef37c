//! End-to-end runs of the engine over realistic routes.

#[cfg(test)]
mod tests {
    use crate::context::{record_from, LeadRecord, PipelineContext, StationOutcome, StopReason};
    use crate::engine::{PipelineEngine, RunStatus};
    use crate::events::CollectingEventSink;
    use crate::routes::Route;
    use crate::stations::{NoOpStation, Station, StationContract, StationOutput};
    use crate::testing::{
        assert_fields_absent, assert_fields_present, assert_outcomes, assert_stop_reason,
        sample_lead, scenario_route, MockStation, ScenarioOptions,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn paid(name: &str, cost: f64) -> Arc<MockStation> {
        Arc::new(MockStation::new(StationContract::new(name).cost(cost)))
    }

    fn route(stations: Vec<Arc<dyn Station>>, budget: f64) -> Route {
        Route::new("test", stations, budget)
    }

    #[tokio::test]
    async fn test_reference_scenario_stops_on_budget() {
        let route = scenario_route(&ScenarioOptions::default(), 0.10);
        let run = PipelineEngine::new().run(sample_lead(), &route).await;

        assert_stop_reason(&run, StopReason::BudgetExceeded);
        assert_outcomes(
            &run,
            &[
                StationOutcome::Continue,
                StationOutcome::Continue,
                StationOutcome::Continue,
                StationOutcome::Continue,
                StationOutcome::Continue,
                StationOutcome::BudgetExceeded,
            ],
        );
        assert_eq!(run.data["_pipeline_cost"], json!(0.08));
        assert_eq!(run.data["_pipeline_stations_executed"], json!(6));
        assert_eq!(run.data["_pipeline_stop_reason"], json!("budget_exceeded"));
        assert_eq!(run.data["_pipeline_errors"], json!(0));
        assert_eq!(run.data["phone"], json!("5551234567"));
        assert_fields_present(&run, &["firstName", "lastName", "phone", "line_type"]);
        assert_fields_absent(&run, &["age", "income", "saved"]);

        assert_eq!(run.spent, 0.08);
        assert_eq!(run.history_cost(), 0.08);
        assert_eq!(run.status(), RunStatus::SkippedEarly);
        assert!(!run.is_failure());
        assert_eq!(
            run.path(),
            vec!["Identity Resolution", "Scraper Lookup", "Skip-Tracing", "Line Type Check", "DNC Check"]
        );
    }

    #[tokio::test]
    async fn test_reference_scenario_completes_with_enough_budget() {
        let route = scenario_route(&ScenarioOptions::default(), 1.0);
        let run = PipelineEngine::new().run(sample_lead(), &route).await;

        assert_stop_reason(&run, StopReason::Completed);
        assert_eq!(run.history.len(), 7);
        assert_eq!(run.spent, 0.11);
        assert_fields_present(&run, &["age", "income", "saved"]);
        assert_eq!(run.status(), RunStatus::Enriched);
    }

    #[tokio::test]
    async fn test_skip_trace_without_phone_fails_lead() {
        let options = ScenarioOptions {
            skip_trace_phone: None,
            ..ScenarioOptions::default()
        };
        let run = PipelineEngine::new()
            .run(sample_lead(), &scenario_route(&options, 1.0))
            .await;

        assert_stop_reason(&run, StopReason::Fail);
        assert_eq!(run.history.len(), 3);
        assert_eq!(run.history[2].outcome, StationOutcome::Fail);
        assert_eq!(run.spent, 0.05);
        assert!(run.is_failure());
        assert_eq!(run.failure_message(), "Skip-Tracing: no phone found");
    }

    #[tokio::test]
    async fn test_dnc_hit_skips_remaining() {
        let options = ScenarioOptions {
            on_dnc: true,
            ..ScenarioOptions::default()
        };
        let run = PipelineEngine::new()
            .run(sample_lead(), &scenario_route(&options, 1.0))
            .await;

        assert_stop_reason(&run, StopReason::SkipRemaining);
        assert_eq!(run.history.last().map(|e| e.outcome), Some(StationOutcome::SkipRemaining));
        assert_eq!(run.data["dnc"], json!(true));
        assert_fields_absent(&run, &["age", "saved"]);
        assert_eq!(run.status(), RunStatus::SkippedEarly);
    }

    #[tokio::test]
    async fn test_budget_never_exceeded() {
        for budget in [0.0, 0.01, 0.03, 0.05, 0.07, 0.1, 0.25] {
            let stations: Vec<Arc<dyn Station>> = vec![
                paid("a", 0.02),
                paid("b", 0.03),
                paid("c", 0.01),
                paid("d", 0.04),
            ];
            let run = PipelineEngine::new()
                .run(LeadRecord::new(), &route(stations, budget))
                .await;

            assert!(run.spent <= budget + 1e-9, "spent {} > budget {budget}", run.spent);
            let invoked: f64 = run
                .history
                .iter()
                .filter(|e| e.outcome.was_invoked())
                .map(|e| e.cost)
                .sum();
            assert!((invoked - run.spent).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_zero_budget_runs_free_stations_only() {
        let free = paid("free", 0.0);
        let costly = paid("costly", 0.01);
        let stations: Vec<Arc<dyn Station>> = vec![free.clone(), costly.clone()];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 0.0)).await;

        assert_eq!(free.call_count(), 1);
        assert_eq!(costly.call_count(), 0);
        assert_stop_reason(&run, StopReason::BudgetExceeded);
    }

    #[tokio::test]
    async fn test_sub_micro_cost_is_not_free() {
        let tiny = paid("tiny", 4e-7);
        let stations: Vec<Arc<dyn Station>> = vec![tiny.clone()];
        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 0.0)).await;

        assert_eq!(tiny.call_count(), 0);
        assert_stop_reason(&run, StopReason::BudgetExceeded);

        let pricier = paid("pricier", 1.8e-6);
        let stations: Vec<Arc<dyn Station>> = vec![pricier.clone()];
        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.6e-6)).await;

        assert_eq!(pricier.call_count(), 0);
        assert_eq!(run.spent, 0.0);
    }

    #[tokio::test]
    async fn test_nothing_runs_after_skip() {
        let first = Arc::new(
            MockStation::new(StationContract::new("gate"))
                .returning(StationOutput::skip_remaining(LeadRecord::new(), "done")),
        );
        let second = paid("after", 0.0);
        let stations: Vec<Arc<dyn Station>> = vec![first, second.clone()];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_eq!(second.call_count(), 0);
        assert_eq!(run.history.len(), 1);
        assert_stop_reason(&run, StopReason::SkipRemaining);
    }

    #[tokio::test]
    async fn test_contract_violation_is_recorded_and_skipped() {
        let needy = Arc::new(MockStation::new(
            StationContract::new("needs phone").requires(["phone", "city"]).cost(0.5),
        ));
        let next = paid("next", 0.0);
        let stations: Vec<Arc<dyn Station>> = vec![needy.clone(), next.clone()];

        let lead = record_from([("city", json!(null))]);
        let run = PipelineEngine::new().run(lead, &route(stations, 1.0)).await;

        assert_eq!(needy.call_count(), 0);
        assert_eq!(next.call_count(), 1);
        assert_outcomes(&run, &[StationOutcome::ContractViolation, StationOutcome::Continue]);
        assert_eq!(run.history[0].cost, 0.0);
        assert_eq!(
            run.history[0].error.as_deref(),
            Some("missing required inputs: city, phone")
        );
        assert_stop_reason(&run, StopReason::Completed);
        assert_eq!(run.spent, 0.0);
    }

    #[tokio::test]
    async fn test_error_charges_cost_and_fails() {
        let broken = Arc::new(
            MockStation::new(StationContract::new("broken").cost(0.04)).erroring("provider 500"),
        );
        let after = paid("after", 0.0);
        let stations: Vec<Arc<dyn Station>> = vec![broken, after.clone()];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_stop_reason(&run, StopReason::Fail);
        assert_outcomes(&run, &[StationOutcome::Error]);
        assert_eq!(run.spent, 0.04);
        assert_eq!(run.data["_pipeline_errors"], json!(1));
        assert!(run.history[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("StationExecutionError: "));
        assert_eq!(after.call_count(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let panicky = Arc::new(
            MockStation::new(StationContract::new("panicky").cost(0.01)).panicking("index out of range"),
        );
        let stations: Vec<Arc<dyn Station>> = vec![panicky];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_stop_reason(&run, StopReason::Fail);
        assert_eq!(run.history[0].outcome, StationOutcome::Error);
        assert_eq!(run.history[0].error.as_deref(), Some("panic: index out of range"));
        assert_eq!(run.spent, 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_station_timeout_fails_lead() {
        let slow = Arc::new(
            MockStation::new(StationContract::new("slow").cost(0.02))
                .with_delay(Duration::from_secs(10))
                .with_timeout(Duration::from_secs(1)),
        );
        let stations: Vec<Arc<dyn Station>> = vec![slow];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_stop_reason(&run, StopReason::Fail);
        assert_eq!(run.history[0].outcome, StationOutcome::Error);
        assert!(run.history[0].error.as_deref().unwrap().contains("timed out after 1000ms"));
        assert_eq!(run.spent, 0.02);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_fatal_timeout_continues() {
        let slow = Arc::new(
            MockStation::new(StationContract::new("optional"))
                .with_delay(Duration::from_secs(10))
                .with_timeout(Duration::from_secs(1))
                .non_fatal_timeout(),
        );
        let after = paid("after", 0.0);
        let stations: Vec<Arc<dyn Station>> = vec![slow, after.clone()];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_outcomes(&run, &[StationOutcome::Error, StationOutcome::Continue]);
        assert_stop_reason(&run, StopReason::Completed);
        assert_eq!(after.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_default_timeout_applies() {
        let slow = Arc::new(
            MockStation::new(StationContract::new("slow")).with_delay(Duration::from_secs(5)),
        );
        let stations: Vec<Arc<dyn Station>> = vec![slow];

        let run = PipelineEngine::new()
            .with_default_station_timeout(Duration::from_secs(2))
            .run(LeadRecord::new(), &route(stations, 1.0))
            .await;

        assert!(run.history[0].error.as_deref().unwrap().contains("2000ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lead_deadline_cuts_station() {
        let slow = Arc::new(
            MockStation::new(StationContract::new("slow").cost(0.01))
                .with_delay(Duration::from_secs(20)),
        );
        let never = paid("never", 0.0);
        let stations: Vec<Arc<dyn Station>> = vec![slow, never.clone()];

        let run = PipelineEngine::new()
            .with_lead_deadline(Duration::from_secs(3))
            .run(LeadRecord::new(), &route(stations, 1.0))
            .await;

        assert_stop_reason(&run, StopReason::Timeout);
        assert_outcomes(&run, &[StationOutcome::DeadlineExceeded]);
        assert_eq!(run.spent, 0.01);
        assert_eq!(never.call_count(), 0);
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_stops_before_station() {
        let station = paid("late", 0.01);
        let stations: Vec<Arc<dyn Station>> = vec![station.clone()];
        let ctx = PipelineContext::new(LeadRecord::new(), 1.0).with_timeout(Duration::ZERO);
        tokio::time::advance(Duration::from_millis(1)).await;

        let run = PipelineEngine::new().run_context(ctx, &route(stations, 1.0)).await;

        assert_eq!(station.call_count(), 0);
        assert_outcomes(&run, &[StationOutcome::DeadlineExceeded]);
        assert_eq!(run.history[0].cost, 0.0);
        assert_stop_reason(&run, StopReason::Timeout);
    }

    #[tokio::test]
    async fn test_undeclared_fields_are_merged() {
        let loose = Arc::new(
            MockStation::new(StationContract::new("loose").produces(["phone"])).returning(
                StationOutput::proceed(record_from([
                    ("phone", json!("5550000000")),
                    ("carrier", json!("Verizon")),
                ])),
            ),
        );
        let stations: Vec<Arc<dyn Station>> = vec![loose];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_eq!(run.data["carrier"], json!("Verizon"));
    }

    #[tokio::test]
    async fn test_last_write_wins_and_stations_see_prior_output() {
        let first = Arc::new(
            MockStation::new(StationContract::new("first").produces(["phone"]))
                .returning(StationOutput::proceed_empty().with_field("phone", "111")),
        );
        let second = Arc::new(
            MockStation::new(StationContract::new("second").requires(["phone"]).produces(["phone"]))
                .returning(StationOutput::proceed_empty().with_field("phone", "222")),
        );
        let stations: Vec<Arc<dyn Station>> = vec![first, second.clone()];

        let run = PipelineEngine::new().run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_eq!(second.seen_records()[0]["phone"], json!("111"));
        assert_eq!(run.data["phone"], json!("222"));
    }

    #[tokio::test]
    async fn test_runs_are_deterministic() {
        let route = scenario_route(&ScenarioOptions::default(), 0.10);
        let engine = PipelineEngine::new();

        let a = engine.run(sample_lead(), &route).await;
        let b = engine.run(sample_lead(), &route).await;

        let outcomes = |run: &crate::engine::PipelineRun| {
            run.history
                .iter()
                .map(|e| (e.station.clone(), e.outcome, e.cost))
                .collect::<Vec<_>>()
        };
        assert_eq!(outcomes(&a), outcomes(&b));
        assert_eq!(a.data, b.data);
        assert_ne!(a.run_id, b.run_id);
    }

    #[tokio::test]
    async fn test_empty_route_completes() {
        let run = PipelineEngine::new()
            .run(sample_lead(), &route(Vec::new(), 1.0))
            .await;

        assert_stop_reason(&run, StopReason::Completed);
        assert!(run.history.is_empty());
        assert_eq!(run.data["_pipeline_stations_executed"], json!(0));
    }

    #[tokio::test]
    async fn test_events_follow_the_run() {
        let sink = Arc::new(CollectingEventSink::new());
        let engine = PipelineEngine::new().with_event_sink(sink.clone());
        let stations: Vec<Arc<dyn Station>> = vec![
            Arc::new(NoOpStation::new("ok")),
            Arc::new(MockStation::new(StationContract::new("needy").requires(["zip"]))),
            paid("too expensive", 5.0),
        ];

        engine.run(LeadRecord::new(), &route(stations, 1.0)).await;

        assert_eq!(
            sink.event_types(),
            vec![
                "pipeline.started",
                "station.started",
                "station.completed",
                "station.skipped",
                "station.skipped",
                "pipeline.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_one_engine() {
        let engine = Arc::new(PipelineEngine::new());
        let route = Arc::new(scenario_route(&ScenarioOptions::default(), 0.10));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            let route = route.clone();
            handles.push(tokio::spawn(async move { engine.run(sample_lead(), &route).await }));
        }
        for handle in handles {
            let run = handle.await.unwrap();
            assert_eq!(run.spent, 0.08);
            assert_stop_reason(&run, StopReason::BudgetExceeded);
        }
    }
}
