//! Configuration schema for API deployments
//!
//! A configuration file names one or more API deployments. Each entry can be
//! turned into a [`BaseUrlApiConfiguration`] with its policies attached.

use super::error::ConfigError;
use super::secrets::SecretString;
use crate::api::retry::{ExponentialBackoff, NoRetry, RetryPolicy};
use crate::api::throttle::{MaxConcurrency, RateLimit, Saturation, ThrottlePolicy};
use crate::api::BaseUrlApiConfiguration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelgateConfig {
    /// Configuration version
    pub version: String,

    /// API deployments by name
    #[serde(default)]
    pub apis: BTreeMap<String, ApiConfigSpec>,
}

impl ModelgateConfig {
    /// Look up a deployment by name
    pub fn api(&self, name: &str) -> Option<&ApiConfigSpec> {
        self.apis.get(name)
    }
}

/// One API deployment
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfigSpec {
    /// Base URL all request paths are joined onto
    pub base_url: String,

    /// API key (supports `${VAR}` interpolation)
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// How the API key is sent
    #[serde(default)]
    pub auth: AuthScheme,

    /// Static headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Default retry policy
    #[serde(default)]
    pub retry: RetrySpec,

    /// Default throttle policy
    #[serde(default)]
    pub throttle: ThrottleSpec,

    /// Transport tuning
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl ApiConfigSpec {
    /// Build the API configuration described by this entry
    pub fn build(&self) -> Result<BaseUrlApiConfiguration, ConfigError> {
        let mut api = BaseUrlApiConfiguration::new(&self.base_url)?;

        let mut names: Vec<&String> = self.headers.keys().collect();
        names.sort();
        for name in names {
            api = api.with_header(name.clone(), self.headers[name].clone())?;
        }

        if let Some(key) = &self.api_key {
            api = match &self.auth {
                AuthScheme::Bearer => api.with_bearer_token(key.clone())?,
                AuthScheme::Header { name } => api.with_api_key_header(name.clone(), key.clone())?,
            };
        }

        api = api.with_retry_arc(self.retry.to_policy());
        if let Some(throttle) = self.throttle.to_policy() {
            api = api.with_throttle_arc(throttle);
        }

        Ok(api)
    }
}

/// How an API key is attached to requests
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// The raw key in a named header
    Header { name: String },
}

/// Retry policy selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetrySpec {
    /// Never retry
    #[default]
    #[serde(rename = "none")]
    Disabled,
    /// Fixed attempt count with exponential backoff
    ExponentialBackoff(ExponentialBackoff),
}

impl RetrySpec {
    /// Instantiate the policy
    pub fn to_policy(&self) -> Arc<dyn RetryPolicy> {
        match self {
            Self::Disabled => Arc::new(NoRetry),
            Self::ExponentialBackoff(policy) => Arc::new(policy.clone()),
        }
    }
}

/// Throttle policy selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThrottleSpec {
    /// No throttling
    #[default]
    #[serde(rename = "none")]
    Disabled,
    /// At most `max` attempts in flight
    MaxConcurrency {
        max: usize,
        #[serde(default)]
        saturation: Saturation,
    },
    /// At most `requests` admissions per `interval_ms`
    RateLimit { requests: usize, interval_ms: u64 },
}

impl ThrottleSpec {
    /// Instantiate the policy; each call creates fresh throttle state
    pub fn to_policy(&self) -> Option<Arc<dyn ThrottlePolicy>> {
        match self {
            Self::Disabled => None,
            Self::MaxConcurrency { max, saturation } => {
                Some(Arc::new(MaxConcurrency::with_saturation(*max, *saturation)))
            }
            Self::RateLimit {
                requests,
                interval_ms,
            } => Some(Arc::new(RateLimit::new(
                *requests,
                Duration::from_millis(*interval_ms),
            ))),
        }
    }
}

/// Connection configuration for the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Maximum idle connections per host
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Largest buffered (non-streamed) response body in bytes
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            max_idle_per_host: default_max_idle(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    120_000
}

fn default_max_idle() -> usize {
    10
}

fn default_max_response_bytes() -> usize {
    32 * 1024 * 1024
}
