//! Response handlers for successful (2xx) responses

use crate::error::{ApiCallError, ApiResult};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-attempt context passed to a response handler
#[derive(Debug, Clone)]
pub struct ResponseContext {
    /// Request URL, for error reporting
    pub url: String,
    /// Correlation id sent as `X-Request-ID`
    pub request_id: Uuid,
    /// Largest body a buffering handler may read
    pub max_response_size: usize,
    /// Cancellation for body reads and streams
    pub cancel: CancellationToken,
}

/// Decodes a successful response into a typed value
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    type Output: Send;

    async fn handle(&self, response: Response, ctx: &ResponseContext) -> ApiResult<Self::Output>;
}

/// Read the whole body, honouring the size cap and cancellation
pub async fn read_body(mut response: Response, ctx: &ResponseContext) -> ApiResult<Bytes> {
    let too_large = |size: u64| {
        ApiCallError::decoding(
            &ctx.url,
            format!(
                "response size {} exceeds maximum {} [request_id: {}]",
                size, ctx.max_response_size, ctx.request_id
            ),
        )
    };

    if let Some(length) = response.content_length() {
        if length > ctx.max_response_size as u64 {
            return Err(too_large(length));
        }
    }

    let mut body = BytesMut::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ApiCallError::Aborted),
            chunk = response.chunk() => chunk,
        };
        match chunk.map_err(|e| ApiCallError::from_reqwest(&e, &ctx.url))? {
            Some(chunk) => {
                if body.len() + chunk.len() > ctx.max_response_size {
                    return Err(too_large((body.len() + chunk.len()) as u64));
                }
                body.extend_from_slice(&chunk);
            }
            None => return Ok(body.freeze()),
        }
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase()
}

/// Returns the raw body bytes
#[derive(Debug, Clone, Default)]
pub struct BufferHandler {
    expected_content_type: Option<String>,
}

impl BufferHandler {
    /// Accept any content type
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a content type starting with `content_type`
    pub fn expecting(content_type: impl Into<String>) -> Self {
        Self {
            expected_content_type: Some(content_type.into().to_lowercase()),
        }
    }

    /// MP3 audio, as returned by speech synthesis endpoints
    pub fn audio_mpeg() -> Self {
        Self::expecting("audio/mpeg")
    }
}

#[async_trait]
impl ResponseHandler for BufferHandler {
    type Output = Bytes;

    async fn handle(&self, response: Response, ctx: &ResponseContext) -> ApiResult<Bytes> {
        if let Some(expected) = &self.expected_content_type {
            let actual = content_type(&response);
            if !actual.starts_with(expected.as_str()) {
                return Err(ApiCallError::decoding(
                    &ctx.url,
                    format!("expected content type {}, got '{}'", expected, actual),
                ));
            }
        }
        read_body(response, ctx).await
    }
}

/// Returns the body as UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct TextHandler;

#[async_trait]
impl ResponseHandler for TextHandler {
    type Output = String;

    async fn handle(&self, response: Response, ctx: &ResponseContext) -> ApiResult<String> {
        let body = read_body(response, ctx).await?;
        String::from_utf8(body.to_vec())
            .map_err(|e| ApiCallError::decoding(&ctx.url, format!("invalid UTF-8: {}", e)))
    }
}

type ValidateFn<T> = Arc<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Parses the body as JSON into `T`, optionally checking the parsed value
pub struct JsonHandler<T> {
    validate: Option<ValidateFn<T>>,
    _output: PhantomData<fn() -> T>,
}

impl<T> JsonHandler<T> {
    pub fn new() -> Self {
        Self {
            validate: None,
            _output: PhantomData,
        }
    }

    /// Reject parsed values for which `validate` fails; the failure is a decoding error
    pub fn with_validation<F>(mut self, validate: F) -> Self
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validate = Some(Arc::new(validate));
        self
    }
}

impl<T> Default for JsonHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonHandler<T> {
    fn clone(&self) -> Self {
        Self {
            validate: self.validate.clone(),
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for JsonHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonHandler")
            .field("output", &std::any::type_name::<T>())
            .field("validated", &self.validate.is_some())
            .finish()
    }
}

#[async_trait]
impl<T> ResponseHandler for JsonHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    async fn handle(&self, response: Response, ctx: &ResponseContext) -> ApiResult<T> {
        let body = read_body(response, ctx).await?;
        let value: T = serde_json::from_slice(&body).map_err(|e| {
            ApiCallError::decoding(
                &ctx.url,
                format!("invalid JSON response: {} [request_id: {}]", e, ctx.request_id),
            )
        })?;

        if let Some(validate) = &self.validate {
            validate(&value).map_err(|message| ApiCallError::decoding(&ctx.url, message))?;
        }
        Ok(value)
    }
}
