//! Environment variable interpolation and API key loading

use super::error::ConfigError;
use super::secrets::SecretString;
use regex::Regex;
use std::env;

const ENV_VAR_PATTERN: &str = r"\$\{([A-Z_][A-Z0-9_]*)\}";

fn env_var_regex() -> Result<Regex, ConfigError> {
    Regex::new(ENV_VAR_PATTERN).map_err(|e| ConfigError::Invalid {
        message: format!("environment variable pattern: {}", e),
    })
}

/// Interpolate `${VAR}` references in a configuration string
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    let pattern = env_var_regex()?;
    let mut result = content.to_string();

    for cap in pattern.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        match env::var(var_name) {
            Ok(value) => {
                result = result.replace(full_match, &value);
            }
            Err(_) => {
                return Err(ConfigError::EnvVarNotFound {
                    var: var_name.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// Names of all `${VAR}` references in `content`, in order of appearance
pub fn referenced_env_vars(content: &str) -> Result<Vec<String>, ConfigError> {
    let pattern = env_var_regex()?;
    Ok(pattern
        .captures_iter(content)
        .map(|cap| cap[1].to_string())
        .collect())
}

/// Use an explicit API key if given, otherwise read it from `env_var`
pub fn load_api_key(
    explicit: Option<SecretString>,
    env_var: &str,
    description: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(key) = explicit.filter(|key| !key.is_empty()) {
        return Ok(key);
    }

    match env::var(env_var) {
        Ok(value) if !value.is_empty() => Ok(SecretString::new(value)),
        _ => Err(ConfigError::ApiKeyMissing {
            description: description.to_string(),
            var: env_var.to_string(),
        }),
    }
}
