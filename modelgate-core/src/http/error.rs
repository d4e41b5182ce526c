//! Failed-response classification
//!
//! A non-2xx response is read once and handed to a [`FailedResponseHandler`],
//! which turns it into an [`ApiCallError::HttpStatus`] with the provider's
//! payload, a readable message, retryability and any server-suggested delay.

use crate::error::{is_retryable_status, ApiCallError, ErrorPayload};
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A non-2xx response with its body already read
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub url: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Classifies failed responses for one provider
pub trait FailedResponseHandler: fmt::Debug + Send + Sync {
    fn handle(&self, response: &FailedResponse) -> ApiCallError;
}

/// Handles the error shapes most providers use
///
/// Recognized JSON bodies:
/// - `{ "error": { "message": "..." } }` (OpenAI style)
/// - `{ "message": "..." }`
/// - `{ "error": "..." }`
///
/// Anything else keeps the raw text as message and payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailedResponseHandler;

impl FailedResponseHandler for DefaultFailedResponseHandler {
    fn handle(&self, response: &FailedResponse) -> ApiCallError {
        let payload = ErrorPayload::from_body(&response.body);
        let details = payload.as_json().and_then(extract_error_details);

        let message = details
            .as_ref()
            .map(|d| d.message.clone())
            .or_else(|| {
                (!response.body.trim().is_empty()).then(|| response.body.trim().to_string())
            })
            .unwrap_or_else(|| format!("HTTP error {}", response.status));

        let retry_after = parse_retry_after(&response.headers)
            .or_else(|| details.and_then(|d| d.retry_after_seconds.map(Duration::from_secs)));

        ApiCallError::http_status(&response.url, response.status, message, payload)
            .with_retry_after(retry_after)
    }
}

type MessageFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
type RetryableFn = Arc<dyn Fn(u16, &Value) -> bool + Send + Sync>;

/// Failed-response handler for a provider with its own JSON error format
///
/// Bodies that are not JSON fall back to [`DefaultFailedResponseHandler`].
#[derive(Clone)]
pub struct JsonErrorResponseHandler {
    message: MessageFn,
    retryable: Option<RetryableFn>,
}

impl JsonErrorResponseHandler {
    /// Extract the message with `message`; retryability follows the status code
    pub fn new<F>(message: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            message: Arc::new(message),
            retryable: None,
        }
    }

    /// Decide retryability from the status and the parsed body
    pub fn with_retryable<F>(mut self, retryable: F) -> Self
    where
        F: Fn(u16, &Value) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(retryable));
        self
    }
}

impl fmt::Debug for JsonErrorResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonErrorResponseHandler")
            .field("custom_retryable", &self.retryable.is_some())
            .finish()
    }
}

impl FailedResponseHandler for JsonErrorResponseHandler {
    fn handle(&self, response: &FailedResponse) -> ApiCallError {
        let json = match serde_json::from_str::<Value>(&response.body) {
            Ok(json) => json,
            Err(_) => return DefaultFailedResponseHandler.handle(response),
        };

        let message = (self.message)(&json)
            .unwrap_or_else(|| format!("HTTP error {}", response.status));
        let retryable = match &self.retryable {
            Some(retryable) => retryable(response.status, &json),
            None => is_retryable_status(response.status),
        };

        ApiCallError::http_status(
            &response.url,
            response.status,
            message,
            ErrorPayload::Json(json),
        )
        .with_retryable(retryable)
        .with_retry_after(parse_retry_after(&response.headers))
    }
}

/// Error details extracted from response body
struct ErrorDetails {
    message: String,
    retry_after_seconds: Option<u64>,
}

/// Extract error details from JSON response
fn extract_error_details(json: &Value) -> Option<ErrorDetails> {
    // OpenAI format: { "error": { "message": "...", "type": "...", "code": "..." } }
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: error.get("retry_after").and_then(|v| v.as_u64()),
            });
        }
    }

    // Generic format: { "message": "...", "error": "..." }
    if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
        return Some(ErrorDetails {
            message: message.to_string(),
            retry_after_seconds: json.get("retry_after").and_then(|v| v.as_u64()),
        });
    }

    if let Some(error) = json.get("error").and_then(|v| v.as_str()) {
        return Some(ErrorDetails {
            message: error.to_string(),
            retry_after_seconds: None,
        });
    }

    None
}

/// Server-suggested delay from `retry-after-ms` or `Retry-After` (seconds)
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);

    if let Some(delay) = header("retry-after-ms")
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok())
    {
        return Some(delay);
    }

    // HTTP dates are not supported; out-of-range values are ignored
    let seconds = header("retry-after")?.parse::<f64>().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}
