//! Retry policies for model API calls
//!
//! A policy only decides; the executor in [`crate::api::executor`] does the
//! waiting and re-invoking.

use crate::error::ApiCallError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of asking a policy about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry { delay: Duration },
    /// Surface the error to the caller
    GiveUp,
}

impl RetryDecision {
    /// Whether the decision is to retry
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }
}

/// Decides whether and when a failed attempt is retried
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// `attempt` is the 1-based number of the attempt that just failed
    fn decide(&self, attempt: u32, error: &ApiCallError) -> RetryDecision;
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn decide(&self, _attempt: u32, _error: &ApiCallError) -> RetryDecision {
        RetryDecision::GiveUp
    }
}

/// Retries retryable errors up to a fixed number of attempts with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExponentialBackoff {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    pub initial_delay_ms: u64,

    /// Upper bound for any computed delay (milliseconds)
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt (e.g., 2.0 for doubling)
    pub backoff_factor: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays
    pub jitter_factor: f64,

    /// Whether to use the server's `Retry-After` when present
    pub respect_retry_after: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.0,
            respect_retry_after: true,
        }
    }
}

impl ExponentialBackoff {
    /// Create a policy allowing `max_attempts` attempts in total
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Short delays and more attempts, for interactive workloads
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 6,
            initial_delay_ms: 50,
            max_delay_ms: 5_000,
            backoff_factor: 1.5,
            jitter_factor: 0.2,
            respect_retry_after: true,
        }
    }

    /// Few attempts with long delays, to minimize provider load
    pub fn conservative() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 15_000,
            backoff_factor: 3.0,
            jitter_factor: 0.3,
            respect_retry_after: true,
        }
    }

    /// Set the delay before the second attempt
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the backoff multiplier, at least `1.0`
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor.max(1.0);
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Delay after the failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32, error: &ApiCallError) -> Duration {
        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_delay() {
                return retry_after.min(Duration::from_millis(self.max_delay_ms));
            }
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let base_delay = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        // A hand-built policy may carry a negative factor
        let capped_delay = base_delay.min(self.max_delay_ms as f64).max(0.0);
        let jitter_factor = self.jitter_factor.clamp(0.0, 1.0);

        let delay_with_jitter = if jitter_factor > 0.0 && capped_delay > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped_delay * jitter_factor;
            let jitter = rng.gen_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay
        };

        Duration::from_millis(delay_with_jitter as u64)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn decide(&self, attempt: u32, error: &ApiCallError) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.calculate_delay(attempt, error),
        }
    }
}
