//! Configuration validation utilities

use super::error::{ValidationError, ValidationErrorKind};
use super::schema::{ApiConfigSpec, ModelgateConfig, RetrySpec, ThrottleSpec};
use crate::api::normalize_base_url;
use tracing::warn;

/// Configuration versions this crate understands
pub const SUPPORTED_VERSION: &str = "1";

/// Validates a parsed configuration before any API configuration is built
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self
    }

    /// Validate the whole configuration, reporting the first failing field
    pub fn validate(&self, config: &ModelgateConfig) -> Result<(), ValidationError> {
        let major = config.version.split('.').next().unwrap_or_default();
        if major != SUPPORTED_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::InvalidVersion {
                    expected: SUPPORTED_VERSION.to_string(),
                    actual: config.version.clone(),
                },
            ));
        }

        for (name, api) in &config.apis {
            self.validate_api(&format!("apis.{}", name), api)?;
        }

        Ok(())
    }

    fn validate_api(&self, path: &str, api: &ApiConfigSpec) -> Result<(), ValidationError> {
        if api.base_url.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.base_url", path)));
        }
        if let Err(e) = normalize_base_url(&api.base_url) {
            return Err(ValidationError::new(
                format!("{}.base_url", path),
                ValidationErrorKind::InvalidUrl {
                    message: e.to_string(),
                },
            ));
        }

        if api.api_key.as_ref().is_some_and(|key| key.is_empty()) {
            warn!(api = %path, "api_key is set but empty");
        }

        if let RetrySpec::ExponentialBackoff(policy) = &api.retry {
            if policy.max_attempts == 0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.retry.max_attempts", path),
                    "must be at least 1",
                ));
            }
            if policy.backoff_factor < 1.0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.retry.backoff_factor", path),
                    format!("{} is below 1.0", policy.backoff_factor),
                ));
            }
            if !(0.0..=1.0).contains(&policy.jitter_factor) {
                return Err(ValidationError::out_of_range(
                    format!("{}.retry.jitter_factor", path),
                    format!("{} is outside 0.0..=1.0", policy.jitter_factor),
                ));
            }
            if policy.initial_delay_ms > policy.max_delay_ms {
                return Err(ValidationError::out_of_range(
                    format!("{}.retry.initial_delay_ms", path),
                    "exceeds max_delay_ms",
                ));
            }
        }

        match &api.throttle {
            ThrottleSpec::MaxConcurrency { max: 0, .. } => {
                return Err(ValidationError::out_of_range(
                    format!("{}.throttle.max", path),
                    "must be at least 1",
                ));
            }
            ThrottleSpec::RateLimit { requests, interval_ms } if *requests == 0 || *interval_ms == 0 => {
                return Err(ValidationError::out_of_range(
                    format!("{}.throttle", path),
                    "requests and interval_ms must be positive",
                ));
            }
            _ => {}
        }

        if api.connection.max_response_bytes == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.connection.max_response_bytes", path),
                "must be positive",
            ));
        }

        for name in api.headers.keys() {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ValidationError::invalid_format(
                    format!("{}.headers.{}", path, name),
                    "not a valid HTTP header name",
                ));
            }
        }

        Ok(())
    }
}
