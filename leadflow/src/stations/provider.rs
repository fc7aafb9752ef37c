//! Provider fallback over the router's ranking.

use super::{Station, StationContract, StationOutput};
use crate::context::{has_field, LeadRecord, PipelineContext};
use crate::errors::{ProviderError, StationError};
use crate::retry::{retry_when, RetryPolicy};
use crate::router::{lead_state, ProviderOutcome, ProviderRouter, TRACKED_DATATYPES};
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What a provider returned for one lead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResponse {
    /// Fields found. Empty when the provider had no match.
    pub fields: LeadRecord,
    /// Whether a captcha had to be solved to get the answer.
    pub captcha_solved: bool,
}

impl ProviderResponse {
    /// A response carrying `fields`.
    #[must_use]
    pub fn found(fields: LeadRecord) -> Self {
        Self {
            fields,
            captcha_solved: false,
        }
    }

    /// A response with no match.
    #[must_use]
    pub fn miss() -> Self {
        Self::default()
    }
}

/// Client for one family of interchangeable providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Looks up a lead at the named provider.
    async fn lookup(&self, provider: &str, lead: &LeadRecord) -> Result<ProviderResponse, ProviderError>;
}

/// Tries providers in ranked order until one has data.
///
/// Every attempt is recorded with the router, whatever the lead's fate.
/// A provider that answers without data is a success for ranking purposes
/// and the next provider is tried. When every provider errors the station
/// fails with [`StationError::ProviderUnavailable`]; when at least one
/// answered but none had data, the route continues.
pub struct ProviderFallbackStation {
    contract: StationContract,
    capability: String,
    client: Arc<dyn ProviderClient>,
    router: Arc<ProviderRouter>,
    retry: RetryPolicy,
    call_timeout: Duration,
    max_providers: Option<usize>,
    carrier: Option<String>,
}

impl Debug for ProviderFallbackStation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFallbackStation")
            .field("name", &self.contract.name)
            .field("capability", &self.capability)
            .field("call_timeout", &self.call_timeout)
            .field("max_providers", &self.max_providers)
            .field("carrier", &self.carrier)
            .finish_non_exhaustive()
    }
}

impl ProviderFallbackStation {
    /// Creates the station.
    #[must_use]
    pub fn new(
        contract: StationContract,
        capability: impl Into<String>,
        client: Arc<dyn ProviderClient>,
        router: Arc<ProviderRouter>,
    ) -> Self {
        Self {
            contract,
            capability: capability.into(),
            client,
            router,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(20),
            max_providers: None,
            carrier: None,
        }
    }

    /// Sets the retry policy for rate-limited calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the timeout for a single provider call.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Caps how many providers are tried per lead.
    #[must_use]
    pub const fn with_max_providers(mut self, max: usize) -> Self {
        self.max_providers = Some(max);
        self
    }

    /// Sets the proxy carrier the client routes through, so each attempt
    /// also feeds the carrier health of the provider's domain.
    #[must_use]
    pub fn with_carrier(mut self, carrier: impl Into<String>) -> Self {
        self.carrier = Some(carrier.into());
        self
    }

    fn has_wanted_data(&self, fields: &LeadRecord) -> bool {
        if self.contract.produces_outputs.is_empty() {
            return !fields.is_empty();
        }
        self.contract
            .produces_outputs
            .iter()
            .any(|key| has_field(fields, key))
    }

    async fn call(&self, provider: &str, lead: &LeadRecord) -> Result<ProviderResponse, ProviderError> {
        let client = self.client.as_ref();
        let timeout = self.call_timeout;
        retry_when(&self.retry, provider, ProviderError::is_rate_limited, || async move {
            tokio::time::timeout(timeout, client.lookup(provider, lead))
                .await
                .unwrap_or(Err(ProviderError::Timeout(timeout)))
        })
        .await
    }

    async fn report(&self, outcome: ProviderOutcome) {
        // Stats are best effort: a store outage must not fail the lead.
        if let Err(e) = self.router.record_outcome(&outcome).await {
            tracing::warn!(
                provider = %outcome.provider,
                error = %e,
                "Failed to record provider outcome"
            );
        }
    }
}

#[async_trait]
impl Station for ProviderFallbackStation {
    fn contract(&self) -> &StationContract {
        &self.contract
    }

    fn timeout(&self) -> Option<Duration> {
        let providers = self
            .max_providers
            .unwrap_or(self.router.config().providers.len())
            .max(1);
        let attempts = self.retry.max_attempts.max(1);
        let per_call = self.call_timeout.saturating_mul(u32::try_from(attempts).unwrap_or(u32::MAX));
        Some(per_call.saturating_mul(u32::try_from(providers).unwrap_or(u32::MAX)))
    }

    async fn process(&self, ctx: &PipelineContext) -> Result<StationOutput, StationError> {
        let ranking = self
            .router
            .ranked()
            .await
            .map_err(|e| StationError::Other(e.into()))?;
        let state = lead_state(ctx.data());
        let limit = self.max_providers.unwrap_or(usize::MAX);

        let mut attempted = Vec::new();
        let mut answered = false;

        for entry in ranking.iter().take(limit) {
            let provider = entry.provider.as_str();
            attempted.push(entry.provider.clone());

            let started = Instant::now();
            let result = self.call(provider, ctx.data()).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(response) => {
                    let found = TRACKED_DATATYPES
                        .into_iter()
                        .filter(|dt| has_field(&response.fields, dt));
                    self.report(
                        ProviderOutcome::new(provider, true, latency_ms)
                            .with_captcha(response.captcha_solved)
                            .with_state(state.clone())
                            .with_datatypes(found)
                            .with_carrier(self.carrier.clone()),
                    )
                    .await;

                    if self.has_wanted_data(&response.fields) {
                        tracing::info!(
                            station = %self.contract.name,
                            provider = %provider,
                            latency_ms,
                            "Provider returned data"
                        );
                        return Ok(StationOutput::proceed(response.fields));
                    }
                    answered = true;
                    tracing::debug!(provider = %provider, "Provider had no match, trying next");
                }
                Err(e) => {
                    self.report(
                        ProviderOutcome::new(provider, false, latency_ms)
                            .with_state(state.clone())
                            .with_carrier(self.carrier.clone()),
                    )
                    .await;
                    tracing::warn!(
                        station = %self.contract.name,
                        provider = %provider,
                        error = %e,
                        "Provider call failed, trying next"
                    );
                }
            }
        }

        if answered {
            return Ok(StationOutput::proceed_empty());
        }
        Err(StationError::provider_unavailable(&self.capability, attempted))
    }
}
