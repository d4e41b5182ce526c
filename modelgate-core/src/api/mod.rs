//! API configuration: where a provider lives, how calls authenticate, and
//! which retry/throttle policies apply by default.

pub mod executor;
pub mod retry;
pub mod throttle;

use crate::config::{ConfigError, SecretString};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub use executor::{call_with_retry_and_throttle, ResilientExecutor};
pub use retry::{ExponentialBackoff, NoRetry, RetryDecision, RetryPolicy};
pub use throttle::{
    MaxConcurrency, RateLimit, Saturation, ThrottlePermit, ThrottlePolicy, ThrottleRegistry,
    Unthrottled,
};

/// Per-call values a header function may depend on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderContext {
    /// Caller-assigned function id
    pub function_id: Option<String>,
    /// Unique id of this call
    pub call_id: String,
    /// Id of the enclosing run, if any
    pub run_id: Option<String>,
}

/// Headers computed on every call (e.g., short-lived tokens)
pub type HeaderFn = Arc<dyn Fn(&HeaderContext) -> HashMap<String, String> + Send + Sync>;

/// Resolves endpoint URLs and headers for one provider deployment
pub trait ApiConfiguration: fmt::Debug + Send + Sync {
    /// Normalized base URL, without a trailing slash
    fn base_url(&self) -> &str;

    /// Join the base URL and `path` with exactly one separating slash
    fn assemble_url(&self, path: &str) -> String {
        join_url(self.base_url(), path)
    }

    /// Headers for one call. Implementations must not cache time-sensitive values.
    fn headers(&self, ctx: &HeaderContext) -> HashMap<String, String>;

    /// Default retry policy for calls through this configuration
    fn retry(&self) -> Option<Arc<dyn RetryPolicy>> {
        None
    }

    /// Default throttle policy for calls through this configuration
    fn throttle(&self) -> Option<Arc<dyn ThrottlePolicy>> {
        None
    }
}

/// Join a normalized base URL and a path.
///
/// Leading slashes of `path` are dropped and runs of slashes inside it are
/// collapsed; query and fragment are appended untouched, without re-encoding.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let split = path
        .find(|c: char| c == '?' || c == '#')
        .unwrap_or(path.len());
    let (path_part, suffix) = path.split_at(split);

    let collapsed = collapse_slashes(path_part);
    let trimmed = collapsed.trim_start_matches('/');
    if trimmed.is_empty() {
        format!("{}{}", base, suffix)
    } else {
        format!("{}/{}{}", base, trimmed, suffix)
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !previous_slash {
                out.push(c);
            }
            previous_slash = true;
        } else {
            out.push(c);
            previous_slash = false;
        }
    }
    out
}

/// Parse and normalize a base URL, failing fast on anything that cannot be joined
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        message: message.to_string(),
    };

    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(invalid("URL has no host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("base URL must not carry a query or fragment"));
    }

    let path = collapse_slashes(url.path());
    url.set_path(&path);
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Components of a base URL, used for provider defaults with partial overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrlParts {
    pub protocol: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: String,
}

impl BaseUrlParts {
    /// Create parts for `protocol://host/path`
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port: None,
            path: path.into(),
        }
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Overlay the fields set in `overrides`
    pub fn merge(&self, overrides: &BaseUrlPartsOverride) -> Self {
        Self {
            protocol: overrides
                .protocol
                .clone()
                .unwrap_or_else(|| self.protocol.clone()),
            host: overrides.host.clone().unwrap_or_else(|| self.host.clone()),
            port: overrides.port.or(self.port),
            path: overrides.path.clone().unwrap_or_else(|| self.path.clone()),
        }
    }

    /// Render as a URL string
    pub fn to_url_string(&self) -> String {
        let port = self.port.map(|p| format!(":{}", p)).unwrap_or_default();
        let path = if self.path.is_empty() || self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}{}{}", self.protocol, self.host, port, path)
    }
}

/// Partial base URL parts; unset fields keep the provider default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrlPartsOverride {
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path: Option<String>,
}

/// A caller's base URL choice on top of provider defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BaseUrlSetting {
    /// Replace the whole base URL
    Url(String),
    /// Override individual parts
    Parts(BaseUrlPartsOverride),
}

#[derive(Clone)]
struct AuthHeader {
    name: String,
    prefix: Option<String>,
    secret: SecretString,
}

impl AuthHeader {
    fn value(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, self.secret.expose_secret()),
            None => self.secret.expose_secret().to_string(),
        }
    }
}

/// Configuration for a provider reachable under a base URL
#[derive(Clone)]
pub struct BaseUrlApiConfiguration {
    base_url: String,
    headers: HashMap<String, String>,
    auth: Option<AuthHeader>,
    header_fn: Option<HeaderFn>,
    retry: Option<Arc<dyn RetryPolicy>>,
    throttle: Option<Arc<dyn ThrottlePolicy>>,
}

impl BaseUrlApiConfiguration {
    /// Create a configuration for `base_url`; malformed URLs fail here
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            headers: HashMap::new(),
            auth: None,
            header_fn: None,
            retry: None,
            throttle: None,
        })
    }

    /// Create from base URL parts
    pub fn from_parts(parts: &BaseUrlParts) -> Result<Self, ConfigError> {
        Self::new(&parts.to_url_string())
    }

    /// Create from provider defaults and an optional caller override
    pub fn with_defaults(
        defaults: &BaseUrlParts,
        setting: Option<&BaseUrlSetting>,
    ) -> Result<Self, ConfigError> {
        match setting {
            None => Self::from_parts(defaults),
            Some(BaseUrlSetting::Url(url)) => Self::new(url),
            Some(BaseUrlSetting::Parts(overrides)) => Self::from_parts(&defaults.merge(overrides)),
        }
    }

    /// Add a static header
    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let value = value.into();
        validate_header(&name, &value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Authenticate with `Authorization: Bearer <token>`
    pub fn with_bearer_token(self, token: impl Into<SecretString>) -> Result<Self, ConfigError> {
        self.with_auth_header("Authorization", Some("Bearer"), token.into())
    }

    /// Authenticate with a provider-specific header (e.g., `X-API-Key`)
    pub fn with_api_key_header(
        self,
        name: impl Into<String>,
        key: impl Into<SecretString>,
    ) -> Result<Self, ConfigError> {
        self.with_auth_header(name, None, key.into())
    }

    fn with_auth_header(
        mut self,
        name: impl Into<String>,
        prefix: Option<&str>,
        secret: SecretString,
    ) -> Result<Self, ConfigError> {
        let auth = AuthHeader {
            name: name.into(),
            prefix: prefix.map(str::to_string),
            secret,
        };
        validate_header(&auth.name, &auth.value())?;
        self.auth = Some(auth);
        Ok(self)
    }

    /// Compute additional headers on every call
    pub fn with_header_fn<F>(mut self, header_fn: F) -> Self
    where
        F: Fn(&HeaderContext) -> HashMap<String, String> + Send + Sync + 'static,
    {
        self.header_fn = Some(Arc::new(header_fn));
        self
    }

    /// Set the default retry policy
    pub fn with_retry(mut self, retry: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(retry));
        self
    }

    /// Set the default retry policy from a shared handle
    pub fn with_retry_arc(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Attach a throttle owned by this configuration and its clones
    pub fn with_throttle(mut self, throttle: impl ThrottlePolicy + 'static) -> Self {
        self.throttle = Some(Arc::new(throttle));
        self
    }

    /// Attach an already shared throttle
    pub fn with_throttle_arc(mut self, throttle: Arc<dyn ThrottlePolicy>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Share one throttle with every configuration using the same base URL in `registry`
    pub fn with_shared_throttle<F>(mut self, registry: &ThrottleRegistry, create: F) -> Self
    where
        F: FnOnce() -> Arc<dyn ThrottlePolicy>,
    {
        self.throttle = Some(registry.get_or_insert_with(&self.base_url, create));
        self
    }

    /// Names of the headers this configuration sends (values omitted)
    pub fn header_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.headers.keys().cloned().collect();
        if let Some(auth) = &self.auth {
            names.push(auth.name.clone());
        }
        names.sort();
        names
    }
}

impl ApiConfiguration for BaseUrlApiConfiguration {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self, ctx: &HeaderContext) -> HashMap<String, String> {
        let mut headers = self.headers.clone();
        if let Some(auth) = &self.auth {
            headers.insert(auth.name.clone(), auth.value());
        }
        if let Some(header_fn) = &self.header_fn {
            headers.extend(header_fn(ctx));
        }
        headers
    }

    fn retry(&self) -> Option<Arc<dyn RetryPolicy>> {
        self.retry.clone()
    }

    fn throttle(&self) -> Option<Arc<dyn ThrottlePolicy>> {
        self.throttle.clone()
    }
}

impl fmt::Debug for BaseUrlApiConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseUrlApiConfiguration")
            .field("base_url", &self.base_url)
            .field("headers", &self.header_names())
            .field("header_fn", &self.header_fn.is_some())
            .field("retry", &self.retry)
            .field("throttle", &self.throttle)
            .finish()
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), ConfigError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
        name: name.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}
