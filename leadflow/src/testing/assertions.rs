//! Assertions over pipeline runs.

use crate::context::{has_field, StationOutcome, StopReason};
use crate::engine::PipelineRun;

/// Asserts the run stopped for `expected`.
pub fn assert_stop_reason(run: &PipelineRun, expected: StopReason) {
    assert_eq!(
        run.stop_reason, expected,
        "Expected stop reason {expected}, got {} (history: {:?})",
        run.stop_reason, run.history
    );
}

/// Asserts the history outcomes, in order.
pub fn assert_outcomes(run: &PipelineRun, expected: &[StationOutcome]) {
    let actual: Vec<StationOutcome> = run.history.iter().map(|e| e.outcome).collect();
    assert_eq!(actual, expected, "History outcomes differ");
}

/// Asserts every key is available in the final record.
pub fn assert_fields_present(run: &PipelineRun, keys: &[&str]) {
    for key in keys {
        assert!(
            has_field(&run.data, key),
            "Expected field '{key}' in output. Keys: {:?}",
            run.data.keys().collect::<Vec<_>>()
        );
    }
}

/// Asserts no key is available in the final record.
pub fn assert_fields_absent(run: &PipelineRun, keys: &[&str]) {
    for key in keys {
        assert!(
            !has_field(&run.data, key),
            "Expected no field '{key}', found {:?}",
            run.data.get(*key)
        );
    }
}
