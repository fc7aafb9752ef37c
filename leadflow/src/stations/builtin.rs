//! Small stations that need no external provider.

use super::{Station, StationContract, StationOutput};
use crate::context::PipelineContext;
use crate::errors::StationError;
use async_trait::async_trait;
use serde_json::json;
use std::fmt::{self, Debug};

/// A station backed by a synchronous closure.
pub struct FnStation<F>
where
    F: Fn(&PipelineContext) -> Result<StationOutput, StationError> + Send + Sync,
{
    contract: StationContract,
    func: F,
}

impl<F> FnStation<F>
where
    F: Fn(&PipelineContext) -> Result<StationOutput, StationError> + Send + Sync,
{
    /// Creates a closure-backed station.
    pub const fn new(contract: StationContract, func: F) -> Self {
        Self { contract, func }
    }
}

impl<F> Debug for FnStation<F>
where
    F: Fn(&PipelineContext) -> Result<StationOutput, StationError> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStation")
            .field("name", &self.contract.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Station for FnStation<F>
where
    F: Fn(&PipelineContext) -> Result<StationOutput, StationError> + Send + Sync,
{
    fn contract(&self) -> &StationContract {
        &self.contract
    }

    async fn process(&self, ctx: &PipelineContext) -> Result<StationOutput, StationError> {
        (self.func)(ctx)
    }
}

/// A station that does nothing and continues.
#[derive(Debug, Clone)]
pub struct NoOpStation {
    contract: StationContract,
}

impl NoOpStation {
    /// Creates a free no-op station.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            contract: StationContract::new(name),
        }
    }
}

#[async_trait]
impl Station for NoOpStation {
    fn contract(&self) -> &StationContract {
        &self.contract
    }

    async fn process(&self, _ctx: &PipelineContext) -> Result<StationOutput, StationError> {
        Ok(StationOutput::proceed_empty())
    }
}

const NAME_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "phd", "md", "mba", "cpa", "esq"];
const NAME_PREFIXES: &[&str] = &["mr", "mrs", "ms", "dr", "prof"];

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| c == '.' || c == ',')
        .to_ascii_lowercase()
}

/// Resolves `firstName`/`lastName` from a free-form `name` field.
///
/// Free: it runs first on every route and fails the lead when no usable
/// first and last name can be found, so no paid station runs on junk.
#[derive(Debug, Clone)]
pub struct IdentityStation {
    contract: StationContract,
}

impl Default for IdentityStation {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityStation {
    /// Station name used in routes.
    pub const NAME: &'static str = "Identity Resolution";

    /// Creates the station.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contract: StationContract::new(Self::NAME)
                .requires(["name"])
                .produces(["firstName", "lastName"]),
        }
    }

    /// Splits a display name into first and last name, dropping honorifics
    /// and suffixes ("Dr. Jane Q. Doe, PhD" -> ("Jane", "Doe")).
    #[must_use]
    pub fn split_name(raw: &str) -> Option<(String, String)> {
        let tokens: Vec<&str> = raw
            .split_whitespace()
            .filter(|t| {
                let n = normalize_token(t);
                !n.is_empty() && !NAME_SUFFIXES.contains(&n.as_str())
            })
            .collect();

        let start = tokens
            .iter()
            .position(|t| !NAME_PREFIXES.contains(&normalize_token(t).as_str()))?;
        let tokens = &tokens[start..];
        if tokens.len() < 2 {
            return None;
        }

        let clean = |t: &str| t.trim_end_matches(',').to_string();
        Some((clean(tokens[0]), clean(tokens[tokens.len() - 1])))
    }
}

#[async_trait]
impl Station for IdentityStation {
    fn contract(&self) -> &StationContract {
        &self.contract
    }

    async fn process(&self, ctx: &PipelineContext) -> Result<StationOutput, StationError> {
        let Some(raw) = ctx.get_str("name") else {
            return Ok(StationOutput::fail("name is not a string"));
        };

        match Self::split_name(raw) {
            Some((first, last)) => {
                tracing::debug!(first = %first, last = %last, "Identity resolved");
                Ok(StationOutput::proceed_empty()
                    .with_field("firstName", json!(first))
                    .with_field("lastName", json!(last)))
            }
            None => {
                tracing::warn!(name = %raw, "Identity resolution failed: missing first or last name");
                Ok(StationOutput::fail(format!("cannot split name '{raw}'")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{record_from, LeadRecord};
    use crate::stations::StopCondition;
    use pretty_assertions::assert_eq;

    fn ctx_with_name(name: &str) -> PipelineContext {
        PipelineContext::new(record_from([("name", json!(name))]), 1.0)
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            IdentityStation::split_name("John Doe"),
            Some(("John".to_string(), "Doe".to_string()))
        );
        assert_eq!(
            IdentityStation::split_name("Dr. Jane Q. Doe, PhD"),
            Some(("Jane".to_string(), "Doe".to_string()))
        );
        assert_eq!(
            IdentityStation::split_name("Robert Smith Jr."),
            Some(("Robert".to_string(), "Smith".to_string()))
        );
        assert_eq!(IdentityStation::split_name("Cher"), None);
        assert_eq!(IdentityStation::split_name("   "), None);
        assert_eq!(IdentityStation::split_name("Mr. Smith"), None);
    }

    #[tokio::test]
    async fn test_identity_station_writes_names() {
        let out = IdentityStation::new()
            .process(&ctx_with_name("Ada Lovelace"))
            .await
            .unwrap();

        assert_eq!(out.condition, StopCondition::Continue);
        assert_eq!(out.fields.get("firstName"), Some(&json!("Ada")));
        assert_eq!(out.fields.get("lastName"), Some(&json!("Lovelace")));
    }

    #[tokio::test]
    async fn test_identity_station_fails_on_single_token() {
        let out = IdentityStation::new()
            .process(&ctx_with_name("Madonna"))
            .await
            .unwrap();
        assert_eq!(out.condition, StopCondition::Fail);
    }

    #[tokio::test]
    async fn test_fn_station_and_noop() {
        let station = FnStation::new(StationContract::new("tagger").produces(["tag"]), |_ctx| {
            Ok(StationOutput::proceed_empty().with_field("tag", "vip"))
        });
        let ctx = PipelineContext::new(LeadRecord::new(), 1.0);

        let out = station.process(&ctx).await.unwrap();
        assert_eq!(out.fields.get("tag"), Some(&json!("vip")));
        assert_eq!(station.name(), "tagger");

        let noop = NoOpStation::new("noop");
        assert_eq!(noop.process(&ctx).await.unwrap(), StationOutput::proceed_empty());
        assert!(noop.timeout().is_none());
        assert!(noop.timeout_is_fatal());
    }
}
