//! Integration tests for loading configuration files from disk.

use std::io::Write;
use std::time::Duration;

use arbiter_config::{ArbiterConfig, ConfigError, ConfigLoader, LogFormat};
use tempfile::Builder;

/// Writes `content` to a temporary file with the given extension.
fn config_file(content: &str, extension: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(&format!(".{extension}"))
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_full_toml_file() {
    let file = config_file(
        r#"
        [service]
        service_name = "grid-pdp"
        entity_id = "https://pdp.example.org"
        http_addr = "0.0.0.0:9152"
        admin_addr = "127.0.0.1:9153"
        shutdown_timeout_secs = 10

        [policy]
        policy_set_id = "grid-policy"
        paps = ["https://pap-a.example.org/query", "https://pap-b.example.org/query"]
        retention_interval_mins = 30
        fetch_timeout_ms = 2000
        startup_retries = 3
        startup_backoff_ms = 100

        [admission]
        max_requests = 64
        max_request_queue_size = 128

        [telemetry.logging]
        level = "debug"
        format = "pretty"

        [telemetry.metrics]
        enabled = true
        addr = "0.0.0.0:9090"
        "#,
        "toml",
    );

    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

    assert_eq!(config.service.service_name, "grid-pdp");
    assert_eq!(config.http_addr().unwrap().port(), 9152);
    assert_eq!(config.admin_addr().unwrap().port(), 9153);
    assert_eq!(config.policy.paps.len(), 2);
    assert_eq!(config.telemetry.logging.format, LogFormat::Pretty);

    let pdp = config.pdp_config();
    assert_eq!(pdp.service_name, "grid-pdp");
    assert_eq!(pdp.cache.refresh_interval, Duration::from_secs(30 * 60));
    assert_eq!(pdp.cache.fetch_timeout, Some(Duration::from_secs(2)));
    assert_eq!(pdp.cache.startup_retries, 3);
    assert_eq!(pdp.admission.queue_capacity, Some(128));

    let client = config.pap_client().unwrap();
    assert_eq!(client.endpoints()[0], "https://pap-a.example.org/query");
}

#[test]
fn test_json_file() {
    let file = config_file(
        r#"{"policy": {"policy_set_id": "grid-policy", "paps": ["http://localhost:8150/query"]}}"#,
        "json",
    );

    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
    assert_eq!(config.policy.policy_set_id, "grid-policy");
    assert_eq!(config.service, ArbiterConfig::default().service);
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .with_file("/nonexistent/arbiter.toml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

#[test]
fn test_optional_missing_file_uses_defaults() {
    let config = ConfigLoader::new()
        .with_optional_file("/nonexistent/arbiter.toml")
        .unwrap()
        .load()
        .unwrap();
    assert_eq!(config, ArbiterConfig::default());
}

#[test]
fn test_unsupported_extension() {
    let file = config_file("policy: {}", "yaml");
    let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("unsupported configuration file format"));
}

#[test]
fn test_malformed_file() {
    let file = config_file("[policy\nretention_interval_mins = ", "toml");
    let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlError(_)));
}

#[test]
fn test_unknown_section_rejected() {
    let file = config_file("[cache]\nsize = 10\n", "toml");
    let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::TomlError(_)));
}
