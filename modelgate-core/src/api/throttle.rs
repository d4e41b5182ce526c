//! Throttle policies limiting how many calls may be in flight or admitted per interval
//!
//! A throttle policy is the only shared mutable state of the pipeline. Its
//! scope is whatever owns the `Arc`: a single API configuration (and its
//! clones), or every configuration that asked a [`ThrottleRegistry`] for the
//! same key.

use crate::error::{ApiCallError, ApiResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Admission for one attempt. The slot is returned exactly once, when the permit is dropped.
#[derive(Debug)]
pub struct ThrottlePermit {
    _slot: Option<OwnedSemaphorePermit>,
}

impl ThrottlePermit {
    /// A permit that holds no slot
    pub fn unbounded() -> Self {
        Self { _slot: None }
    }

    fn holding(slot: OwnedSemaphorePermit) -> Self {
        Self { _slot: Some(slot) }
    }
}

/// Governs admission of calls
#[async_trait]
pub trait ThrottlePolicy: fmt::Debug + Send + Sync {
    /// Wait for admission. Must return [`ApiCallError::Aborted`] as soon as `cancel` fires.
    async fn acquire(&self, cancel: &CancellationToken) -> ApiResult<ThrottlePermit>;
}

/// Admits every call immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct Unthrottled;

#[async_trait]
impl ThrottlePolicy for Unthrottled {
    async fn acquire(&self, cancel: &CancellationToken) -> ApiResult<ThrottlePermit> {
        if cancel.is_cancelled() {
            return Err(ApiCallError::Aborted);
        }
        Ok(ThrottlePermit::unbounded())
    }
}

/// What a throttle does when it is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Saturation {
    /// Suspend until a slot frees up
    #[default]
    Wait,
    /// Fail immediately with [`ApiCallError::ThrottleRejected`]
    Reject,
}

/// Limits the number of concurrently running attempts.
///
/// Waiters are admitted in FIFO order.
#[derive(Debug)]
pub struct MaxConcurrency {
    max: usize,
    semaphore: Arc<Semaphore>,
    saturation: Saturation,
}

impl MaxConcurrency {
    /// Allow at most `max` attempts at once (at least one), waiting when full
    pub fn new(max: usize) -> Self {
        Self::with_saturation(max, Saturation::Wait)
    }

    /// Allow at most `max` attempts at once, rejecting when full
    pub fn rejecting(max: usize) -> Self {
        Self::with_saturation(max, Saturation::Reject)
    }

    /// Create with an explicit saturation behavior
    pub fn with_saturation(max: usize, saturation: Saturation) -> Self {
        let max = max.max(1);
        Self {
            max,
            semaphore: Arc::new(Semaphore::new(max)),
            saturation,
        }
    }

    /// Configured ceiling
    pub fn max_concurrency(&self) -> usize {
        self.max
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl ThrottlePolicy for MaxConcurrency {
    async fn acquire(&self, cancel: &CancellationToken) -> ApiResult<ThrottlePermit> {
        if cancel.is_cancelled() {
            return Err(ApiCallError::Aborted);
        }

        match self.saturation {
            Saturation::Reject => match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(slot) => Ok(ThrottlePermit::holding(slot)),
                Err(TryAcquireError::NoPermits) => Err(ApiCallError::ThrottleRejected {
                    message: format!("all {} concurrency slots are in use", self.max),
                }),
                Err(TryAcquireError::Closed) => Err(ApiCallError::ThrottleRejected {
                    message: "throttle closed".to_string(),
                }),
            },
            Saturation::Wait => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(ApiCallError::Aborted),
                    slot = Arc::clone(&self.semaphore).acquire_owned() => slot
                        .map(ThrottlePermit::holding)
                        .map_err(|_| ApiCallError::ThrottleRejected {
                            message: "throttle closed".to_string(),
                        }),
                }
            }
        }
    }
}

/// Admits at most `max_requests` calls within any sliding window of `interval`
#[derive(Debug)]
pub struct RateLimit {
    max_requests: usize,
    interval: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimit {
    /// Create a limiter admitting `max_requests` (at least one) per `interval`
    pub fn new(max_requests: usize, interval: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            interval,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Convenience for a per-minute budget
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Admit now, or report how long until the oldest admission leaves the window
    fn try_admit(&self) -> Result<(), Duration> {
        let mut admitted = self
            .admitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();

        while let Some(oldest) = admitted.front() {
            if now.duration_since(*oldest) >= self.interval {
                admitted.pop_front();
            } else {
                break;
            }
        }

        if admitted.len() < self.max_requests {
            admitted.push_back(now);
            return Ok(());
        }

        let wait = admitted
            .front()
            .map(|oldest| (*oldest + self.interval).saturating_duration_since(now))
            .unwrap_or_default();
        Err(wait)
    }
}

#[async_trait]
impl ThrottlePolicy for RateLimit {
    async fn acquire(&self, cancel: &CancellationToken) -> ApiResult<ThrottlePermit> {
        loop {
            if cancel.is_cancelled() {
                return Err(ApiCallError::Aborted);
            }

            let wait = match self.try_admit() {
                Ok(()) => return Ok(ThrottlePermit::unbounded()),
                Err(wait) => wait,
            };

            tracing::debug!("Rate limit reached, waiting {:?} for admission", wait);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiCallError::Aborted),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Caller-owned map of throttles shared by key (typically a normalized base URL)
#[derive(Debug, Clone, Default)]
pub struct ThrottleRegistry {
    policies: Arc<Mutex<HashMap<String, Arc<dyn ThrottlePolicy>>>>,
}

impl ThrottleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the throttle registered under `key`, creating it on first use
    pub fn get_or_insert_with<F>(&self, key: &str, create: F) -> Arc<dyn ThrottlePolicy>
    where
        F: FnOnce() -> Arc<dyn ThrottlePolicy>,
    {
        let mut policies = self
            .policies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(policies.entry(key.to_string()).or_insert_with(create))
    }

    /// Number of registered throttles
    pub fn len(&self) -> usize {
        self.policies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether no throttle has been registered yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
