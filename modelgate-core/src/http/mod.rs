//! HTTP transport for model API calls
//!
//! This module implements the HTTP layer, handling:
//! - Connection pooling and client management
//! - Request bodies (JSON, multipart form, raw binary)
//! - Failed-response classification and retry hints
//! - Buffered and streamed response decoding
//! - Request ID generation and correlation

pub mod client;
pub mod error;
pub mod handlers;
pub mod streaming;

pub use client::HttpClient;
pub use error::{
    parse_retry_after, DefaultFailedResponseHandler, FailedResponse, FailedResponseHandler,
    JsonErrorResponseHandler,
};
pub use handlers::{BufferHandler, JsonHandler, ResponseContext, ResponseHandler, TextHandler};
pub use streaming::{
    sse_json, EventStream, EventStreamHandler, FrameError, NdjsonCodec, SseCodec, SseEvent,
    StreamStep, DONE_MARKER,
};

use crate::api::{ApiConfiguration, HeaderContext};
use crate::error::{ApiCallError, ApiResult};
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;

/// A fully resolved request, reusable across retry attempts
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Absolute request URL
    pub url: String,
    /// HTTP method
    pub method: Method,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Optional body
    pub body: Option<RequestBody>,
}

impl ApiRequest {
    /// Create a request without headers or body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Create a POST request
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a request against `path` of an API configuration, with its headers for `ctx`
    pub fn for_api(
        method: Method,
        api: &dyn ApiConfiguration,
        path: &str,
        ctx: &HeaderContext,
    ) -> Self {
        Self {
            url: api.assemble_url(path),
            method,
            headers: api.headers(ctx),
            body: None,
        }
    }

    /// Add a header, replacing any previous value
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add several headers
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Send a JSON body
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// Send a multipart form; fields keep their order
    pub fn with_form(mut self, fields: Vec<FormField>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    /// Send raw bytes with the given content type
    pub fn with_binary(mut self, bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Binary {
            bytes: bytes.into(),
            content_type: content_type.into(),
        });
        self
    }
}

/// Request body variants
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// `application/json`
    Json(Value),
    /// `multipart/form-data`
    Form(Vec<FormField>),
    /// Raw bytes
    Binary { bytes: Bytes, content_type: String },
}

/// One multipart form field
#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

/// Value of a multipart form field
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    Bytes {
        data: Bytes,
        filename: Option<String>,
        mime: Option<String>,
    },
}

impl FormField {
    /// A text field
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    /// A file-like field
    pub fn bytes(
        name: impl Into<String>,
        data: impl Into<Bytes>,
        filename: Option<String>,
        mime: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Bytes {
                data: data.into(),
                filename,
                mime,
            },
        }
    }
}

/// Build a fresh multipart form; a `Form` is consumed by sending, so every attempt needs its own
pub(crate) fn build_form(url: &str, fields: &[FormField]) -> ApiResult<Form> {
    let mut form = Form::new();
    for field in fields {
        form = match &field.value {
            FormValue::Text(text) => form.text(field.name.clone(), text.clone()),
            FormValue::Bytes {
                data,
                filename,
                mime,
            } => {
                let mut part = Part::bytes(data.to_vec());
                if let Some(filename) = filename {
                    part = part.file_name(filename.clone());
                }
                if let Some(mime) = mime {
                    part = part.mime_str(mime).map_err(|e| {
                        ApiCallError::invalid_request(
                            url,
                            format!("invalid MIME type for field '{}': {}", field.name, e),
                        )
                    })?;
                }
                form.part(field.name.clone(), part)
            }
        };
    }
    Ok(form)
}
