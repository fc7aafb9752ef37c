//! Proxy carrier health per provider domain.
//!
//! One hash per domain, two counters per carrier
//! (`{carrier}:success_count`, `{carrier}:failure_count`), so every update is
//! a single atomic increment.

use super::{non_negative, ProviderRouter, FAILURE_COUNT, SUCCESS_COUNT};
use crate::errors::StoreError;
use crate::store::parse_counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_CARRIER: &str = "default";

/// Fail rate assumed for a carrier with no calls yet.
const UNTRIED_FAIL_RATE: f64 = 0.5;

/// Success and failure counts for one carrier on one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierStats {
    /// Normalised carrier name ("att", "tmobile", "default").
    pub carrier: String,
    /// Successful calls.
    pub success_count: u64,
    /// Failed calls.
    pub failure_count: u64,
}

impl CarrierStats {
    /// Share of failed calls, or 0.5 when the carrier is untried.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fail_rate(&self) -> f64 {
        let total = self.success_count.saturating_add(self.failure_count);
        if total == 0 {
            UNTRIED_FAIL_RATE
        } else {
            self.failure_count as f64 / total as f64
        }
    }
}

/// Lower-cases a carrier and drops spaces and underscores ("T Mobile" and
/// "t_mobile" both become "tmobile"). Blank means "default".
pub(crate) fn normalize_carrier(carrier: &str) -> String {
    let carrier: String = carrier
        .trim()
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    if carrier.is_empty() {
        DEFAULT_CARRIER.to_string()
    } else {
        carrier
    }
}

/// Lower-cases a domain, appending ".com" to bare names.
fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        "unknown".to_string()
    } else if domain.contains('.') {
        domain
    } else {
        format!("{domain}.com")
    }
}

impl ProviderRouter {
    fn carrier_key(&self, domain: &str) -> String {
        format!("{}{}", self.config.carrier_prefix, normalize_domain(domain))
    }

    /// Records one call through `carrier` against `domain`. A provider name
    /// works as a domain ("ZabaSearch" is "zabasearch.com").
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn record_carrier(&self, domain: &str, carrier: &str, success: bool) -> Result<(), StoreError> {
        let field = format!(
            "{}:{}",
            normalize_carrier(carrier),
            if success { SUCCESS_COUNT } else { FAILURE_COUNT }
        );
        self.store
            .hincr_many(&self.carrier_key(domain), &[(field.as_str(), 1)])
            .await
    }

    /// Returns every carrier seen on `domain`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or a counter is corrupt.
    pub async fn carrier_health(&self, domain: &str) -> Result<Vec<CarrierStats>, StoreError> {
        let key = self.carrier_key(domain);
        let hash = self.store.hgetall(&key).await?;

        let mut by_carrier: BTreeMap<&str, CarrierStats> = BTreeMap::new();
        for field in hash.keys() {
            let Some((carrier, counter)) = field.rsplit_once(':') else {
                continue;
            };
            let value = non_negative(parse_counter(&hash, &key, field)?);
            let stats = by_carrier.entry(carrier).or_insert_with(|| CarrierStats {
                carrier: carrier.to_string(),
                success_count: 0,
                failure_count: 0,
            });
            match counter {
                SUCCESS_COUNT => stats.success_count = value,
                FAILURE_COUNT => stats.failure_count = value,
                _ => {}
            }
        }
        Ok(by_carrier.into_values().collect())
    }

    /// Returns the carrier with the lowest fail rate on `domain`, skipping
    /// `exclude`. Ties go to the first name alphabetically. `None` when no
    /// carrier has been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or a counter is corrupt.
    pub async fn preferred_carrier(&self, domain: &str, exclude: &[&str]) -> Result<Option<String>, StoreError> {
        let excluded: Vec<String> = exclude.iter().map(|c| normalize_carrier(c)).collect();
        let best = self
            .carrier_health(domain)
            .await?
            .into_iter()
            .filter(|stats| !excluded.contains(&stats.carrier))
            .min_by(|a, b| {
                a.fail_rate()
                    .total_cmp(&b.fail_rate())
                    .then_with(|| a.carrier.cmp(&b.carrier))
            });
        Ok(best.map(|stats| stats.carrier))
    }
}
