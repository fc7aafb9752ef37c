//! Backoff and retry helpers.
//!
//! Used in two places: provider calls that hit a rate limit are retried in
//! place by the fallback station, and workers back off when the shared store
//! is unreachable.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Randomisation applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Use the computed delay as is.
    None,
    /// Uniform in `0..=delay`.
    #[default]
    Full,
    /// Half fixed, half uniform.
    Equal,
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth of the delay.
    pub backoff: BackoffStrategy,
    /// Randomisation of the delay.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::Full,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay before retry number `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent).saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full if delay == 0 => 0,
            JitterStrategy::Full => rand::thread_rng().gen_range(0..=delay),
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Stateful backoff for loops that retry indefinitely (e.g. a worker
/// waiting for the store to come back).
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: usize,
}

impl Backoff {
    /// Starts a fresh backoff sequence.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Restarts the sequence after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        self.attempt
    }
}

/// Runs `operation`, retrying errors accepted by `should_retry` until the
/// policy's attempts are used up.
///
/// Errors rejected by `should_retry` are returned immediately.
pub async fn retry_when<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::debug!(
                    operation = %label,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
