//! Bounded exponential-backoff retry for document-store calls.
//!
//! Each [`RetryPolicy::execute`] call is an independent state machine:
//!
//! ```text
//! Attempt(n) ──ok──────────────────────────────► Done
//! Attempt(n) ──err, n < max, retryable──► Wait(backoff(n))
//! Wait(backoff(n)) ──► Attempt(n+1)
//! Attempt(n) ──err, n = max or not retryable──► Failed(err)
//! ```
//!
//! The wait before attempt `n + 1` is `multiplier * 2^(n-1)` seconds clamped
//! to `[min_wait, max_wait]`; with the defaults that is 4s, 4s, 4s, 8s.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tokio::time;
use tracing::{error, warn};

/// Classifies errors for retry purposes.
///
/// Implement this for any error an operation under [`RetryPolicy`] can return.
pub trait Retryable {
    /// `true` if the same call might succeed when repeated.
    fn is_transient(&self) -> bool;
}

/// Which failures the policy retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryScope {
    /// Retry only errors classified transient by [`Retryable`].
    #[default]
    Transient,
    /// Retry every error, including ones that cannot succeed on repeat.
    Any,
}

/// Retry parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub multiplier: f64,
    pub scope: RetryScope,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(10),
            multiplier: 1.0,
            scope: RetryScope::Transient,
        }
    }
}

impl RetryPolicy {
    /// Wait inserted after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(62) as i32);
        let secs = self.multiplier * exp;
        let wait = if secs.is_finite() && secs >= 0.0 {
            Duration::from_secs_f64(secs.min(self.max_wait.as_secs_f64()))
        } else {
            self.max_wait
        };
        wait.clamp(self.min_wait, self.max_wait.max(self.min_wait))
    }

    /// Sum of every wait a call that exhausts its attempts sleeps through.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts.max(1)).map(|n| self.backoff(n)).sum()
    }

    fn should_retry<E: Retryable>(&self, err: &E) -> bool {
        match self.scope {
            RetryScope::Transient => err.is_transient(),
            RetryScope::Any => true,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                return Err(err);
            }
            if attempt >= max_attempts {
                error!(
                    operation,
                    attempts = attempt,
                    error = %err,
                    "store operation failed; retries exhausted"
                );
                return Err(err);
            }

            let wait = self.backoff(attempt);
            warn!(
                operation,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "store operation failed; retrying"
            );
            time::sleep(wait).await;
            attempt += 1;
        }
    }
}
