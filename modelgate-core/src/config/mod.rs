//! Configuration for API deployments
//!
//! Configuration files are YAML or JSON. `${VAR}` references are replaced
//! with environment values before parsing, then the result is validated.
//!
//! ```yaml
//! version: "1"
//! apis:
//!   lmnt:
//!     base_url: https://api.lmnt.com/v1/ai
//!     api_key: ${LMNT_API_KEY}
//!     auth: { type: header, name: X-API-Key }
//!     retry: { type: exponential_backoff, max_attempts: 3 }
//!     throttle: { type: max_concurrency, max: 4 }
//! ```

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::{interpolate_env_vars, load_api_key, referenced_env_vars};
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    ApiConfigSpec, AuthScheme, ConnectionConfig, ModelgateConfig, RetrySpec, ThrottleSpec,
};
pub use secrets::{is_sensitive_field, strip_sensitive_fields, SecretString};
pub use validator::{ConfigValidator, SUPPORTED_VERSION};

use std::fs;
use std::path::Path;
use tracing::debug;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<ModelgateConfig> {
    let path = path.as_ref();
    let content = read_config(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<ModelgateConfig> {
    let path = path.as_ref();
    let content = read_config(path)?;
    parse_json(&content, &path.to_string_lossy())
}

/// Parse a YAML configuration held in memory
pub fn from_yaml_str(content: &str) -> ConfigResult<ModelgateConfig> {
    parse_yaml(content, "<string>")
}

/// Parse a JSON configuration held in memory
pub fn from_json_str(content: &str) -> ConfigResult<ModelgateConfig> {
    parse_json(content, "<string>")
}

fn read_config(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

fn parse_yaml(content: &str, origin: &str) -> ConfigResult<ModelgateConfig> {
    // Interpolate environment variables before parsing
    let interpolated = env::interpolate_env_vars(content)?;

    let config: ModelgateConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })?;

    finish(config, origin)
}

fn parse_json(content: &str, origin: &str) -> ConfigResult<ModelgateConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: ModelgateConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
            path: origin.to_string(),
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })?;

    finish(config, origin)
}

fn finish(config: ModelgateConfig, origin: &str) -> ConfigResult<ModelgateConfig> {
    ConfigValidator::new().validate(&config)?;
    debug!(origin, apis = config.apis.len(), "loaded configuration");
    Ok(config)
}
