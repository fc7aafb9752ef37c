//! Reputation ranking for interchangeable providers.
//!
//! Counters live in the shared store so every worker sees the same picture.
//! The ranking is recomputed from the raw counters on every call and is never
//! cached. The router only ranks; picking a provider is the caller's job.
//!
//! Alongside the ranking counters it keeps three heat maps: per state, per
//! datatype found (latency to find an age, income or phone) and per proxy
//! carrier on each provider's domain.

mod carrier;

pub use carrier::CarrierStats;

use crate::context::LeadRecord;
use crate::errors::StoreError;
use crate::store::{parse_counter, SharedStore};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

const SUCCESS_COUNT: &str = "success_count";
const FAILURE_COUNT: &str = "failure_count";
const CAPTCHA_COUNT: &str = "captcha_count";
const TOTAL_LATENCY_MS: &str = "total_latency_ms";
const COUNT: &str = "count";

/// Datatypes whose lookup latency is tracked per provider.
pub const TRACKED_DATATYPES: [&str; 3] = ["age", "income", "phone"];

fn default_key_prefix() -> String {
    "gps:provider:".to_string()
}

fn default_state_prefix() -> String {
    "gps:state:".to_string()
}

fn default_datatype_prefix() -> String {
    "gps:datatype:".to_string()
}

fn default_carrier_prefix() -> String {
    "carrier_health:".to_string()
}

fn default_providers() -> Vec<String> {
    [
        "FastPeopleSearch",
        "TruePeopleSearch",
        "ZabaSearch",
        "SearchPeopleFree",
        "ThatsThem",
        "AnyWho",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Router settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Prefix of the per-provider stats hash.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Prefix of the per-state heat map hashes.
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,
    /// Prefix of the per-datatype latency hashes.
    #[serde(default = "default_datatype_prefix")]
    pub datatype_prefix: String,
    /// Prefix of the per-domain carrier health hashes.
    #[serde(default = "default_carrier_prefix")]
    pub carrier_prefix: String,
    /// The providers to rank, in tie-free registration order.
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            state_prefix: default_state_prefix(),
            datatype_prefix: default_datatype_prefix(),
            carrier_prefix: default_carrier_prefix(),
            providers: default_providers(),
        }
    }
}

/// One provider call, as reported by the station that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOutcome {
    /// Provider name.
    pub provider: String,
    /// Whether the provider answered (regardless of whether it had data).
    pub success: bool,
    /// Wall time of the call.
    pub latency_ms: u64,
    /// Whether a captcha had to be solved.
    pub captcha_solved: bool,
    /// Two-letter state of the lead, for the heat map. Normalised to
    /// upper case when recorded.
    pub state: Option<String>,
    /// Datatypes the call found (e.g. "age", "phone").
    pub datatypes_found: Vec<String>,
    /// Proxy carrier the call went through.
    pub carrier: Option<String>,
}

impl ProviderOutcome {
    /// Creates an outcome with no captcha and no state.
    #[must_use]
    pub fn new(provider: impl Into<String>, success: bool, latency_ms: u64) -> Self {
        Self {
            provider: provider.into(),
            success,
            latency_ms,
            captcha_solved: false,
            state: None,
            datatypes_found: Vec::new(),
            carrier: None,
        }
    }

    /// Marks that a captcha was solved.
    #[must_use]
    pub const fn with_captcha(mut self, solved: bool) -> Self {
        self.captcha_solved = solved;
        self
    }

    /// Sets the lead's state.
    #[must_use]
    pub fn with_state(mut self, state: Option<String>) -> Self {
        self.state = state;
        self
    }

    /// Sets the datatypes the call found.
    #[must_use]
    pub fn with_datatypes<I, S>(mut self, datatypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datatypes_found = datatypes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the proxy carrier used.
    #[must_use]
    pub fn with_carrier(mut self, carrier: Option<String>) -> Self {
        self.carrier = carrier;
        self
    }
}

/// A provider's position in the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRanking {
    /// Provider name.
    pub provider: String,
    /// Percentage of successful calls, 1 decimal.
    pub success_rate: f64,
    /// Mean latency in seconds, 2 decimals.
    pub avg_latency_sec: f64,
    /// Mean latency in milliseconds, whole number.
    pub avg_latency_ms: f64,
    /// Captchas solved so far.
    pub captcha_count: u64,
    /// Calls observed (successes plus failures).
    pub n: u64,
}

/// Success and failure counts for one provider in one state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStats {
    /// Successful calls.
    pub success_count: u64,
    /// Failed calls.
    pub failure_count: u64,
}

/// Lookup latency of one provider for one datatype.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DatatypeStats {
    /// Calls that found the datatype.
    pub count: u64,
    /// Latency attributed to the datatype, summed.
    pub total_latency_ms: u64,
    /// Mean attributed latency, whole milliseconds (0 when unused).
    pub avg_latency_ms: f64,
}

/// Normalises a state to its trimmed, upper-cased first two letters.
fn normalize_state(state: &str) -> Option<String> {
    let state: String = state.trim().chars().take(2).collect::<String>().to_uppercase();
    (!state.is_empty()).then_some(state)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[allow(clippy::cast_precision_loss)]
fn ranking_from_counters(provider: &str, s: u64, f: u64, latency_ms: u64, captchas: u64) -> ProviderRanking {
    let n = s.saturating_add(f);
    let (success_rate, avg_ms) = if n == 0 {
        (0.0, 0.0)
    } else {
        (s as f64 / n as f64 * 100.0, latency_ms as f64 / n as f64)
    };
    ProviderRanking {
        provider: provider.to_string(),
        success_rate: round_to(success_rate, 1),
        avg_latency_sec: round_to(avg_ms / 1000.0, 2),
        avg_latency_ms: avg_ms.round(),
        captcha_count: captchas,
        n,
    }
}

fn compare_rankings(a: &ProviderRanking, b: &ProviderRanking) -> Ordering {
    b.success_rate
        .total_cmp(&a.success_rate)
        .then_with(|| a.avg_latency_sec.total_cmp(&b.avg_latency_sec))
        .then_with(|| a.provider.cmp(&b.provider))
}

/// Reads the lead's two-letter state from `state`/`State`, falling back to
/// the last two-letter token of `location`/`geoRegion` ("Austin, TX").
#[must_use]
pub fn lead_state(lead: &LeadRecord) -> Option<String> {
    let text = |key: &str| lead.get(key).and_then(|v| v.as_str()).map(str::trim);

    if let Some(state) = text("state").or_else(|| text("State")).filter(|s| !s.is_empty()) {
        return Some(state.chars().take(2).collect::<String>().to_uppercase());
    }

    let location = text("location")
        .or_else(|| text("geoRegion"))
        .filter(|s| !s.is_empty())?;
    location
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .rev()
        .find(|t| t.len() == 2 && t.chars().all(|c| c.is_ascii_alphabetic()))
        .map(str::to_uppercase)
}

/// Tracks provider outcomes and ranks providers by them.
#[derive(Debug, Clone)]
pub struct ProviderRouter {
    store: Arc<dyn SharedStore>,
    config: RouterConfig,
}

impl ProviderRouter {
    /// Creates a router over a shared store.
    #[must_use]
    pub fn new(store: Arc<dyn SharedStore>, config: RouterConfig) -> Self {
        Self { store, config }
    }

    /// Returns the router settings.
    #[must_use]
    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn provider_key(&self, provider: &str) -> String {
        format!("{}{provider}", self.config.key_prefix)
    }

    fn state_key(&self, state: &str, provider: &str) -> String {
        format!("{}{state}:{provider}", self.config.state_prefix)
    }

    fn datatype_key(&self, datatype: &str, provider: &str) -> String {
        format!("{}{datatype}:{provider}", self.config.datatype_prefix)
    }

    /// Records one call's success and latency.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn record(&self, provider: &str, success: bool, latency_ms: u64) -> Result<(), StoreError> {
        self.record_outcome(&ProviderOutcome::new(provider, success, latency_ms))
            .await
    }

    /// Records one call with captcha and state detail.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn record_outcome(&self, outcome: &ProviderOutcome) -> Result<(), StoreError> {
        let result_field = if outcome.success { SUCCESS_COUNT } else { FAILURE_COUNT };
        let latency = i64::try_from(outcome.latency_ms).unwrap_or(i64::MAX);

        let mut deltas = vec![(result_field, 1), (TOTAL_LATENCY_MS, latency)];
        if outcome.captcha_solved {
            deltas.push((CAPTCHA_COUNT, 1));
        }
        self.store
            .hincr_many(&self.provider_key(&outcome.provider), &deltas)
            .await?;

        if let Some(state) = outcome.state.as_deref().and_then(normalize_state) {
            self.store
                .hincr_many(&self.state_key(&state, &outcome.provider), &[(result_field, 1)])
                .await?;
        }

        // Latency is split evenly across everything the call found.
        let found = u64::try_from(outcome.datatypes_found.len().max(1)).unwrap_or(1);
        let share = i64::try_from(outcome.latency_ms / found).unwrap_or(i64::MAX);
        for datatype in &outcome.datatypes_found {
            let datatype = datatype.trim().to_lowercase();
            if !TRACKED_DATATYPES.contains(&datatype.as_str()) {
                continue;
            }
            self.store
                .hincr_many(
                    &self.datatype_key(&datatype, &outcome.provider),
                    &[(TOTAL_LATENCY_MS, share), (COUNT, 1)],
                )
                .await?;
        }

        if let Some(carrier) = &outcome.carrier {
            self.record_carrier(&outcome.provider, carrier, outcome.success)
                .await?;
        }

        tracing::debug!(
            provider = %outcome.provider,
            success = outcome.success,
            latency_ms = outcome.latency_ms,
            "Recorded provider outcome"
        );
        Ok(())
    }

    /// Returns every configured provider, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or a counter is corrupt.
    pub async fn ranked(&self) -> Result<Vec<ProviderRanking>, StoreError> {
        let mut rankings = Vec::with_capacity(self.config.providers.len());
        for provider in &self.config.providers {
            let key = self.provider_key(provider);
            let hash = self.store.hgetall(&key).await?;
            rankings.push(ranking_from_counters(
                provider,
                non_negative(parse_counter(&hash, &key, SUCCESS_COUNT)?),
                non_negative(parse_counter(&hash, &key, FAILURE_COUNT)?),
                non_negative(parse_counter(&hash, &key, TOTAL_LATENCY_MS)?),
                non_negative(parse_counter(&hash, &key, CAPTCHA_COUNT)?),
            ));
        }
        rankings.sort_by(compare_rankings);
        Ok(rankings)
    }

    /// Returns a provider's counts for one state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or a counter is corrupt.
    pub async fn state_stats(&self, state: &str, provider: &str) -> Result<StateStats, StoreError> {
        let Some(state) = normalize_state(state) else {
            return Ok(StateStats::default());
        };
        let key = self.state_key(&state, provider);
        let hash = self.store.hgetall(&key).await?;
        Ok(StateStats {
            success_count: non_negative(parse_counter(&hash, &key, SUCCESS_COUNT)?),
            failure_count: non_negative(parse_counter(&hash, &key, FAILURE_COUNT)?),
        })
    }

    /// Returns a provider's lookup latency for one datatype.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or a counter is corrupt.
    #[allow(clippy::cast_precision_loss)]
    pub async fn datatype_stats(&self, datatype: &str, provider: &str) -> Result<DatatypeStats, StoreError> {
        let key = self.datatype_key(&datatype.trim().to_lowercase(), provider);
        let hash = self.store.hgetall(&key).await?;
        let count = non_negative(parse_counter(&hash, &key, COUNT)?);
        let total_latency_ms = non_negative(parse_counter(&hash, &key, TOTAL_LATENCY_MS)?);
        let avg_latency_ms = if count == 0 {
            0.0
        } else {
            (total_latency_ms as f64 / count as f64).round()
        };
        Ok(DatatypeStats {
            count,
            total_latency_ms,
            avg_latency_ms,
        })
    }
}
