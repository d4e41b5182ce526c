//! Secrets handling: API keys that never show up in Debug/Display output or
//! in the settings a model reports to observers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A wrapper type for sensitive strings like API keys
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the actual value (use with caution)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    /// Check if the secret is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Get a partially redacted version for debugging
    pub fn partial_redact(&self) -> String {
        if self.value.is_empty() {
            return "[EMPTY]".to_string();
        }

        let chars: Vec<char> = self.value.chars().collect();
        let len = chars.len();
        if len <= 8 {
            "[REDACTED]".to_string()
        } else if self.value.starts_with("sk-") || self.value.starts_with("pk-") {
            let tail: String = chars[len - 4..].iter().collect();
            format!("{}...{}", &self.value[..3], tail)
        } else {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[len - 2..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Key segments that mark a field as secret on their own
const SENSITIVE_SEGMENTS: [&str; 11] = [
    "apikey",
    "secret",
    "secrets",
    "token",
    "password",
    "passwd",
    "credential",
    "credentials",
    "authorization",
    "cookie",
    "bearer",
];

/// Adjacent segment pairs that mark a field as secret (`api_key`, `privateKey`)
const SENSITIVE_PAIRS: [(&str, &str); 3] = [("api", "key"), ("private", "key"), ("access", "key")];

/// Split a key into lowercase segments at `_`, `-`, `.` and camelCase boundaries
fn key_segments(field_name: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in field_name.chars() {
        if matches!(c, '_' | '-' | '.' | ' ') {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Whether a field name looks like it holds a secret
///
/// Whole key segments are matched, so `access_token` is sensitive while
/// counts such as `max_tokens` are not.
pub fn is_sensitive_field(field_name: &str) -> bool {
    let segments = key_segments(field_name);
    segments
        .iter()
        .any(|segment| SENSITIVE_SEGMENTS.contains(&segment.as_str()))
        || segments.windows(2).any(|pair| {
            SENSITIVE_PAIRS
                .iter()
                .any(|(first, second)| pair[0] == *first && pair[1] == *second)
        })
}

/// Drop every entry whose key looks sensitive, recursing into nested objects
/// and arrays
pub fn strip_sensitive_fields(map: &mut Map<String, Value>) {
    map.retain(|key, _| !is_sensitive_field(key));
    for value in map.values_mut() {
        strip_nested(value);
    }
}

fn strip_nested(value: &mut Value) {
    match value {
        Value::Object(nested) => strip_sensitive_fields(nested),
        Value::Array(items) => items.iter_mut().for_each(strip_nested),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_string_redaction() {
        let secret = SecretString::new("sk-1234567890abcdef");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.partial_redact(), "sk-...cdef");
        assert_eq!(SecretString::new("short").partial_redact(), "[REDACTED]");
        assert_eq!(SecretString::new("my-secret-value").partial_redact(), "my...ue");
    }

    #[test]
    fn test_secret_string_expose() {
        let secret = SecretString::new("my-secret-value");
        assert_eq!(secret.expose_secret(), "my-secret-value");
    }

    #[test]
    fn test_strip_sensitive_fields() {
        let mut settings = json!({
            "voice": "lily",
            "apiKey": "sk-abc",
            "auth": { "access_token": "t", "region": "eu" }
        });
        let Value::Object(map) = &mut settings else {
            unreachable!()
        };
        strip_sensitive_fields(map);

        assert_eq!(settings, json!({ "voice": "lily", "auth": { "region": "eu" } }));
    }

    #[test]
    fn test_token_counts_are_not_secrets() {
        for key in ["max_tokens", "maxTokens", "max_completion_tokens", "tokenizer", "voice"] {
            assert!(!is_sensitive_field(key), "{} flagged", key);
        }
        for key in [
            "api_key",
            "apiKey",
            "X-API-Key",
            "access_token",
            "refreshToken",
            "client_secret",
            "password",
            "Authorization",
            "private_key",
        ] {
            assert!(is_sensitive_field(key), "{} not flagged", key);
        }
    }

    #[test]
    fn test_strip_keeps_settings_and_recurses_into_arrays() {
        let mut settings = json!({
            "model": "m",
            "max_tokens": 256,
            "temperature": 0.2,
            "api_key": "sk-abc",
            "tools": [{ "name": "search", "access_token": "t" }]
        });
        let Value::Object(map) = &mut settings else {
            unreachable!()
        };
        strip_sensitive_fields(map);

        assert_eq!(
            settings,
            json!({
                "model": "m",
                "max_tokens": 256,
                "temperature": 0.2,
                "tools": [{ "name": "search" }]
            })
        );
    }
}
