//! HTTP client implementation using reqwest

use crate::api::{ApiConfiguration, HeaderContext, ResilientExecutor};
use crate::config::{ConfigError, ConnectionConfig};
use crate::error::{ApiCallError, ApiResult};
use crate::http::error::{FailedResponse, FailedResponseHandler};
use crate::http::handlers::{read_body, ResponseContext, ResponseHandler};
use crate::http::{build_form, ApiRequest, RequestBody};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder, Method};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default maximum buffered response size (32MB)
const MAX_RESPONSE_SIZE: usize = 32 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("modelgate/", env!("CARGO_PKG_VERSION"));

/// Header carrying the per-attempt correlation id
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

static SHARED: OnceLock<HttpClient> = OnceLock::new();

/// Shared HTTP client with connection pooling
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Maximum buffered response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_connection_config(&ConnectionConfig::default())
    }

    /// Create a new HTTP client with custom timeouts and pool size
    pub fn with_config(
        connect_timeout: Duration,
        request_timeout: Duration,
        max_idle_per_host: usize,
    ) -> Result<Self, ConfigError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client: Arc::new(client),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// Create a client tuned by a connection configuration
    pub fn from_connection_config(config: &ConnectionConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_config(
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.request_timeout_ms),
            config.max_idle_per_host,
        )?
        .with_max_response_size(config.max_response_bytes))
    }

    /// Process-wide client with default settings, created on first use
    pub fn shared() -> Result<Self, ConfigError> {
        if let Some(client) = SHARED.get() {
            return Ok(client.clone());
        }
        let client = Self::new()?;
        Ok(SHARED.get_or_init(|| client).clone())
    }

    /// Cap the size of buffered response bodies
    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Current buffered response cap
    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    /// Perform one attempt of `request` and decode the response
    ///
    /// Non-2xx responses are classified by `failed`; 2xx responses are decoded
    /// by `handler`. Firing `cancel` at any point yields [`ApiCallError::Aborted`].
    pub async fn request<H>(
        &self,
        request: &ApiRequest,
        failed: &dyn FailedResponseHandler,
        handler: &H,
        cancel: &CancellationToken,
    ) -> ApiResult<H::Output>
    where
        H: ResponseHandler + ?Sized,
    {
        if cancel.is_cancelled() {
            return Err(ApiCallError::Aborted);
        }

        let request_id = Uuid::new_v4();
        let url = request.url.as_str();
        debug!("{} {} [request_id: {}]", request.method, url, request_id);

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => builder = builder.header(name, value),
                _ => warn!(
                    "Skipping invalid header '{}' [request_id: {}]",
                    name, request_id
                ),
            }
        }
        builder = builder.header(REQUEST_ID_HEADER, request_id.to_string());

        builder = match &request.body {
            None => builder,
            Some(RequestBody::Json(body)) => builder.json(body),
            Some(RequestBody::Form(fields)) => builder.multipart(build_form(url, fields)?),
            Some(RequestBody::Binary {
                bytes,
                content_type,
            }) => builder
                .header(CONTENT_TYPE, content_type.as_str())
                .body(bytes.clone()),
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiCallError::Aborted),
            sent = builder.send() => sent,
        };
        let response = sent.map_err(|e| {
            warn!("Request to {} failed [request_id: {}]: {}", url, request_id, e);
            ApiCallError::from_reqwest(&e, url)
        })?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request_id);

        let ctx = ResponseContext {
            url: url.to_string(),
            request_id,
            max_response_size: self.max_response_size,
            cancel: cancel.clone(),
        };

        if !status.is_success() {
            let headers = response.headers().clone();
            let body = match read_body(response, &ctx).await {
                Ok(body) => String::from_utf8_lossy(&body).into_owned(),
                Err(ApiCallError::Aborted) => return Err(ApiCallError::Aborted),
                Err(_) => String::new(),
            };

            warn!(
                "Request failed with status {} for {} [request_id: {}]",
                status, url, request_id
            );

            return Err(failed.handle(&FailedResponse {
                url: url.to_string(),
                status: status.as_u16(),
                headers,
                body,
            }));
        }

        let output = handler.handle(response, &ctx).await?;
        info!("Request completed for {} [request_id: {}]", url, request_id);
        Ok(output)
    }

    /// POST a JSON body to `path` of `api`, with the api's retry and throttle policies
    #[allow(clippy::too_many_arguments)]
    pub async fn post_json_to_api<H>(
        &self,
        api: &dyn ApiConfiguration,
        path: &str,
        ctx: &HeaderContext,
        body: Value,
        failed: &dyn FailedResponseHandler,
        handler: &H,
        cancel: &CancellationToken,
    ) -> ApiResult<H::Output>
    where
        H: ResponseHandler + ?Sized,
    {
        let request = ApiRequest::for_api(Method::POST, api, path, ctx).with_json(body);
        self.post_to_api(api, &request, failed, handler, cancel).await
    }

    /// Send a prepared request with the retry and throttle policies of `api`
    pub async fn post_to_api<H>(
        &self,
        api: &dyn ApiConfiguration,
        request: &ApiRequest,
        failed: &dyn FailedResponseHandler,
        handler: &H,
        cancel: &CancellationToken,
    ) -> ApiResult<H::Output>
    where
        H: ResponseHandler + ?Sized,
    {
        ResilientExecutor::new(api.retry(), api.throttle())
            .execute(cancel, || self.request(request, failed, handler, cancel))
            .await
    }
}
