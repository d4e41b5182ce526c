//! Classified errors for model API calls
//!
//! Every failure that leaves the transport is classified exactly once into an
//! [`ApiCallError`]. The executor and model layers pass it through unchanged,
//! so callers always see the original classification.

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result type for model API operations
pub type ApiResult<T> = Result<T, ApiCallError>;

/// What went wrong at the network level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailureKind {
    /// DNS resolution or connection establishment failed
    Connect,
    /// The request or body read timed out
    Timeout,
    /// The connection broke while the body was being transferred
    Body,
    /// Anything else reported by the HTTP stack
    Other,
}

/// Provider error payload attached to a non-2xx response
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPayload {
    /// The body parsed as JSON
    Json(Value),
    /// The body was not JSON; raw text is kept
    Text(String),
    /// The response carried no body
    Empty,
}

impl ErrorPayload {
    /// Build a payload from a raw response body
    pub fn from_body(body: &str) -> Self {
        if body.trim().is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(json) => Self::Json(json),
            Err(_) => Self::Text(body.to_string()),
        }
    }

    /// The JSON payload, if any
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Errors that can occur while invoking a model API
#[derive(Debug, Clone, Error)]
pub enum ApiCallError {
    /// DNS, connection, timeout or broken-body failures
    #[error("Network error calling {url}: {message}")]
    Network {
        url: String,
        kind: NetworkFailureKind,
        message: String,
    },

    /// The server answered with a non-2xx status
    #[error("HTTP {status} from {url}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
        payload: ErrorPayload,
        retry_after: Option<Duration>,
        retryable: bool,
    },

    /// The call was cancelled by the caller
    #[error("Call aborted")]
    Aborted,

    /// The response body could not be decoded by the response handler
    #[error("Failed to decode response from {url}: {message}")]
    Decoding { url: String, message: String },

    /// A throttle policy refused admission outright
    #[error("Throttle rejected call: {message}")]
    ThrottleRejected { message: String },

    /// The request could not be built; nothing was sent
    #[error("Invalid request to {url}: {message}")]
    InvalidRequest { url: String, message: String },
}

impl ApiCallError {
    /// Create a network failure
    pub fn network(
        url: impl Into<String>,
        kind: NetworkFailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Network {
            url: url.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create a decoding failure
    pub fn decoding(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decoding {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a request-building failure
    pub fn invalid_request(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP status failure with the default retryability for `status`
    pub fn http_status(
        url: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        payload: ErrorPayload,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            message: message.into(),
            payload,
            retry_after: None,
            retryable: is_retryable_status(status),
        }
    }

    /// Classify a `reqwest` failure that happened before a status was available
    pub fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        let kind = if err.is_timeout() {
            NetworkFailureKind::Timeout
        } else if err.is_connect() {
            NetworkFailureKind::Connect
        } else if err.is_body() || err.is_decode() {
            NetworkFailureKind::Body
        } else {
            NetworkFailureKind::Other
        };
        Self::network(url, kind, err.to_string())
    }

    /// Whether a retry policy may try the call again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::HttpStatus { retryable, .. } => *retryable,
            Self::ThrottleRejected { .. } => true,
            Self::Aborted => false,
            Self::Decoding { .. } => false,
            Self::InvalidRequest { .. } => false,
        }
    }

    /// Server-suggested delay before the next attempt
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error is a cancellation
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// HTTP status code, for status failures
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Override the retryability of an HTTP status failure
    pub fn with_retryable(mut self, value: bool) -> Self {
        if let Self::HttpStatus { retryable, .. } = &mut self {
            *retryable = value;
        }
        self
    }

    /// Attach a server-suggested retry delay to an HTTP status failure
    pub fn with_retry_after(mut self, delay: Option<Duration>) -> Self {
        if let Self::HttpStatus { retry_after, .. } = &mut self {
            *retry_after = delay;
        }
        self
    }
}

/// Default retryability of an HTTP status: 408, 429 and 5xx
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_body() {
        assert_eq!(ErrorPayload::from_body("  "), ErrorPayload::Empty);
        assert_eq!(
            ErrorPayload::from_body("oops"),
            ErrorPayload::Text("oops".to_string())
        );
        let payload = ErrorPayload::from_body(r#"{"error":"bad voice"}"#);
        assert_eq!(payload.as_json().unwrap()["error"], "bad voice");
    }

    #[test]
    fn test_retryability() {
        assert!(ApiCallError::network("u", NetworkFailureKind::Connect, "refused").is_retryable());
        assert!(!ApiCallError::Aborted.is_retryable());
        assert!(!ApiCallError::decoding("u", "bad json").is_retryable());
        assert!(ApiCallError::http_status("u", 503, "down", ErrorPayload::Empty).is_retryable());
        assert!(!ApiCallError::http_status("u", 400, "bad", ErrorPayload::Empty).is_retryable());
        assert!(ApiCallError::http_status("u", 400, "bad", ErrorPayload::Empty)
            .with_retryable(true)
            .is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_status_failures() {
        let err = ApiCallError::http_status("u", 429, "slow down", ErrorPayload::Empty)
            .with_retry_after(Some(Duration::from_secs(3)));
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(3)));
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(ApiCallError::Aborted.retry_delay(), None);
    }
}
