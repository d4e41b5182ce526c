//! Integration tests for configuration loading and validation

use modelgate_core::api::{ApiConfiguration, HeaderContext};
use modelgate_core::config::{
    load_from_json, load_from_yaml, referenced_env_vars, AuthScheme, ConfigError, RetrySpec,
    ThrottleSpec, ValidationErrorKind,
};
use modelgate_core::http::HttpClient;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Helper to create a test config file
fn create_test_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_valid_yaml_config() {
    env::set_var("MODELGATE_TEST_LMNT_KEY", "lmnt-test-key");

    let yaml = r#"
version: "1"
apis:
  lmnt:
    base_url: https://api.lmnt.com/v1/ai/
    api_key: ${MODELGATE_TEST_LMNT_KEY}
    auth:
      type: header
      name: X-API-Key
    retry:
      type: exponential_backoff
      max_attempts: 4
      initial_delay_ms: 250
    throttle:
      type: max_concurrency
      max: 2
  local:
    base_url: http://localhost:11434/api
    connection:
      request_timeout_ms: 300000
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    let config = load_from_yaml(path).expect("config should load");
    assert_eq!(config.version, "1");
    assert_eq!(config.apis.len(), 2);

    let lmnt = config.api("lmnt").unwrap();
    assert_eq!(lmnt.api_key.as_ref().unwrap().expose_secret(), "lmnt-test-key");
    assert_eq!(
        lmnt.auth,
        AuthScheme::Header {
            name: "X-API-Key".to_string()
        }
    );
    match &lmnt.retry {
        RetrySpec::ExponentialBackoff(policy) => {
            assert_eq!(policy.max_attempts, 4);
            assert_eq!(policy.initial_delay_ms, 250);
            assert_eq!(policy.backoff_factor, 2.0);
        }
        other => panic!("Expected exponential backoff, got: {:?}", other),
    }

    let api = lmnt.build().unwrap();
    assert_eq!(api.base_url(), "https://api.lmnt.com/v1/ai");
    assert_eq!(
        api.headers(&HeaderContext::default())["X-API-Key"],
        "lmnt-test-key"
    );
    assert!(api.throttle().is_some());

    let local = config.api("local").unwrap();
    assert_eq!(local.throttle, ThrottleSpec::Disabled);
    assert_eq!(local.connection.request_timeout_ms, 300_000);
    assert_eq!(local.connection.connect_timeout_ms, 10_000);
    assert!(HttpClient::from_connection_config(&local.connection).is_ok());

    env::remove_var("MODELGATE_TEST_LMNT_KEY");
}

#[test]
fn test_load_valid_json_config() {
    env::set_var("MODELGATE_TEST_OPENAI_KEY", "sk-test-json");

    let json = r#"{
  "version": "1.2",
  "apis": {
    "openai": {
      "base_url": "https://api.openai.com/v1",
      "api_key": "${MODELGATE_TEST_OPENAI_KEY}",
      "headers": { "OpenAI-Organization": "org-123" },
      "throttle": { "type": "rate_limit", "requests": 60, "interval_ms": 60000 }
    }
  }
}"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.json", json);

    let config = load_from_json(path).expect("config should load");
    let api = config.api("openai").unwrap().build().unwrap();
    let headers = api.headers(&HeaderContext::default());
    assert_eq!(headers["Authorization"], "Bearer sk-test-json");
    assert_eq!(headers["OpenAI-Organization"], "org-123");
    assert_eq!(
        api.assemble_url("chat/completions"),
        "https://api.openai.com/v1/chat/completions"
    );

    env::remove_var("MODELGATE_TEST_OPENAI_KEY");
}

#[test]
fn test_missing_env_var() {
    let yaml = r#"
version: "1"
apis:
  openai:
    base_url: https://api.openai.com/v1
    api_key: ${MODELGATE_TEST_UNSET_VARIABLE}
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    match load_from_yaml(path) {
        Err(ConfigError::EnvVarNotFound { var }) => {
            assert_eq!(var, "MODELGATE_TEST_UNSET_VARIABLE");
        }
        other => panic!("Expected EnvVarNotFound, got: {:?}", other),
    }
}

#[test]
fn test_referenced_env_vars() {
    let content = "a: ${FIRST_KEY}\nb: ${SECOND_KEY}\nc: $NOT_A_REFERENCE\n";
    assert_eq!(
        referenced_env_vars(content).unwrap(),
        vec!["FIRST_KEY", "SECOND_KEY"]
    );
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = load_from_yaml(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::IoError { .. })));
}

#[test]
fn test_missing_version_field() {
    let yaml = r#"
apis:
  local:
    base_url: http://localhost:8080
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    match load_from_yaml(path) {
        Err(ConfigError::ParseError { message, .. }) => {
            assert!(message.contains("version"));
        }
        other => panic!("Expected ParseError, got: {:?}", other),
    }
}

#[test]
fn test_invalid_version() {
    let yaml = r#"
version: "2.0"
apis: {}
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    match load_from_yaml(path) {
        Err(ConfigError::ValidationError(e)) => {
            assert_eq!(e.field_path, "version");
            assert!(matches!(e.kind, ValidationErrorKind::InvalidVersion { .. }));
        }
        other => panic!("Expected ValidationError, got: {:?}", other),
    }
}

#[test]
fn test_invalid_url_format() {
    let yaml = r#"
version: "1"
apis:
  broken:
    base_url: not-a-valid-url
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    match load_from_yaml(path) {
        Err(ConfigError::ValidationError(e)) => {
            assert_eq!(e.field_path, "apis.broken.base_url");
            assert!(matches!(e.kind, ValidationErrorKind::InvalidUrl { .. }));
        }
        other => panic!("Expected ValidationError, got: {:?}", other),
    }
}

#[test]
fn test_retry_policy_validation() {
    let yaml = r#"
version: "1"
apis:
  flaky:
    base_url: https://api.example.com
    retry:
      type: exponential_backoff
      max_attempts: 0
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    match load_from_yaml(path) {
        Err(ConfigError::ValidationError(e)) => {
            assert_eq!(e.field_path, "apis.flaky.retry.max_attempts");
            assert!(matches!(e.kind, ValidationErrorKind::OutOfRange { .. }));
        }
        other => panic!("Expected ValidationError, got: {:?}", other),
    }
}

#[test]
fn test_throttle_validation() {
    let yaml = r#"
version: "1"
apis:
  limited:
    base_url: https://api.example.com
    throttle:
      type: rate_limit
      requests: 10
      interval_ms: 0
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);

    match load_from_yaml(path) {
        Err(ConfigError::ValidationError(e)) => {
            assert!(e.field_path.starts_with("apis.limited.throttle"));
        }
        other => panic!("Expected ValidationError, got: {:?}", other),
    }
}

#[test]
fn test_unknown_throttle_type() {
    let yaml = r#"
version: "1"
apis:
  odd:
    base_url: https://api.example.com
    throttle:
      type: token_bucket
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);
    assert!(matches!(
        load_from_yaml(path),
        Err(ConfigError::ParseError { .. })
    ));
}

#[test]
fn test_api_key_redaction() {
    let yaml = r#"
version: "1"
apis:
  openai:
    base_url: https://api.openai.com/v1
    api_key: sk-1234567890abcdefghijklmnop
"#;

    let dir = TempDir::new().unwrap();
    let path = create_test_file(&dir, "config.yaml", yaml);
    let config = load_from_yaml(path).unwrap();

    let debug_output = format!("{:?}", config);
    assert!(!debug_output.contains("sk-1234567890abcdefghijklmnop"));
    assert!(debug_output.contains("[REDACTED]"));

    let api = config.api("openai").unwrap().build().unwrap();
    let debug_output = format!("{:?}", api);
    assert!(!debug_output.contains("sk-1234567890abcdefghijklmnop"));
    assert!(debug_output.contains("Authorization"));
}
