//! The schema-less lead record and helpers for reading it.

use serde_json::Value;
use std::collections::BTreeSet;

/// An insertion-ordered map of field name to JSON value.
///
/// Fields accrue monotonically as stations run. There is no fixed schema.
pub type LeadRecord = serde_json::Map<String, Value>;

/// Prefix of the summary fields the engine writes onto the final record.
pub const PIPELINE_FIELD_PREFIX: &str = "_pipeline_";

/// Field carried on republished leads to count DLQ round trips.
pub const RETRY_COUNT_FIELD: &str = "_dlq_retry_count";

/// Returns true if `key` is present and not `null`.
#[must_use]
pub fn has_field(record: &LeadRecord, key: &str) -> bool {
    record.get(key).is_some_and(|v| !v.is_null())
}

/// Returns the required fields that are not available, in sorted order.
#[must_use]
pub fn missing_fields(record: &LeadRecord, required: &BTreeSet<String>) -> Vec<String> {
    required
        .iter()
        .filter(|key| !has_field(record, key))
        .cloned()
        .collect()
}

/// Returns a copy of the record without engine summary fields.
#[must_use]
pub fn strip_pipeline_fields(record: &LeadRecord) -> LeadRecord {
    record
        .iter()
        .filter(|(k, _)| !k.starts_with(PIPELINE_FIELD_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Reads the DLQ retry counter carried on a lead, defaulting to zero.
#[must_use]
pub fn retry_count(record: &LeadRecord) -> u32 {
    record
        .get(RETRY_COUNT_FIELD)
        .and_then(Value::as_u64)
        .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX))
}

/// Builds a record from `(key, value)` pairs, keeping their order.
#[must_use]
pub fn record_from<I, K>(pairs: I) -> LeadRecord
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
