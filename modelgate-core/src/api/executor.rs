//! Retry + throttle execution of a single model API call
//!
//! Each attempt acquires its own throttle admission and releases it when the
//! attempt resolves, so a call waiting out a backoff delay never holds a slot.

use crate::api::retry::{NoRetry, RetryDecision, RetryPolicy};
use crate::api::throttle::{ThrottlePermit, ThrottlePolicy};
use crate::error::{ApiCallError, ApiResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `call` until it succeeds, fails fatally, the policy gives up, or `cancel` fires.
///
/// Without a retry policy the call is attempted once. The error surfaced after
/// giving up is the last attempt's error, unchanged.
pub async fn call_with_retry_and_throttle<T, F, Fut>(
    retry: Option<&dyn RetryPolicy>,
    throttle: Option<&dyn ThrottlePolicy>,
    cancel: &CancellationToken,
    mut call: F,
) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let retry = retry.unwrap_or(&NoRetry);
    let mut attempt: u32 = 1;

    loop {
        // A rejected admission is an attempt like any other
        let outcome = match admit(throttle, cancel).await {
            Ok(_permit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ApiCallError::Aborted),
                result = call() => result,
            },
            Err(error) => Err(error),
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Call succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if error.is_abort() {
            return Err(error);
        }

        let delay = match retry.decide(attempt, &error) {
            RetryDecision::GiveUp => {
                if attempt > 1 {
                    warn!("Giving up after {} attempts: {}", attempt, error);
                }
                return Err(error);
            }
            RetryDecision::Retry { delay } => delay,
        };

        warn!(
            "Attempt {} failed with retryable error, retrying in {:?}: {}",
            attempt, delay, error
        );
        wait(delay, cancel).await?;
        attempt += 1;
    }
}

async fn admit(
    throttle: Option<&dyn ThrottlePolicy>,
    cancel: &CancellationToken,
) -> ApiResult<ThrottlePermit> {
    match throttle {
        Some(throttle) => throttle.acquire(cancel).await,
        None if cancel.is_cancelled() => Err(ApiCallError::Aborted),
        None => Ok(ThrottlePermit::unbounded()),
    }
}

async fn wait(delay: Duration, cancel: &CancellationToken) -> ApiResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ApiCallError::Aborted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Owned pair of policies, as supplied by an API configuration
#[derive(Debug, Clone, Default)]
pub struct ResilientExecutor {
    retry: Option<Arc<dyn RetryPolicy>>,
    throttle: Option<Arc<dyn ThrottlePolicy>>,
}

impl ResilientExecutor {
    /// Create an executor from optional policies
    pub fn new(
        retry: Option<Arc<dyn RetryPolicy>>,
        throttle: Option<Arc<dyn ThrottlePolicy>>,
    ) -> Self {
        Self { retry, throttle }
    }

    /// The retry policy in use, if any
    pub fn retry(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry.as_ref()
    }

    /// The throttle policy in use, if any
    pub fn throttle(&self) -> Option<&Arc<dyn ThrottlePolicy>> {
        self.throttle.as_ref()
    }

    /// Execute `call` with this executor's policies
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, call: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        call_with_retry_and_throttle(
            self.retry.as_deref(),
            self.throttle.as_deref(),
            cancel,
            call,
        )
        .await
    }
}
