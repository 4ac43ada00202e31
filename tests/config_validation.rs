//! Integration tests for configuration loading and validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;
use swaggersocket::config::{LoggingConfig, ProtocolConfig, ServerConfig};
use swaggersocket::error::ProtocolError;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ProtocolConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = ProtocolConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = ProtocolConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_base_path_must_be_absolute() {
    let config = ProtocolConfig::default_with_overrides(|c| c.server.base_path = "api".into());
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Base path must start with '/'")));

    let config = ProtocolConfig::default_with_overrides(|c| c.server.base_path = "/api".into());
    assert!(config.validate().is_empty());
}

#[test]
fn test_timeout_bounds() {
    let server = ServerConfig {
        sub_request_timeout: Duration::from_millis(1),
        long_poll_timeout: Duration::from_secs(600),
        ..ServerConfig::default()
    };
    let errors = server.validate();
    assert!(errors.iter().any(|e| e.contains("Sub-request timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Long-poll timeout too long")));
}

#[test]
fn test_zero_sessions_and_tiny_messages_rejected() {
    let server = ServerConfig {
        max_sessions: 0,
        max_message_size: 16,
        session_ttl: Duration::ZERO,
        ..ServerConfig::default()
    };
    let errors = server.validate();
    assert_eq!(errors.len(), 3, "{errors:?}");
}

#[test]
fn test_empty_app_name_rejected() {
    let logging = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert_eq!(logging.validate().len(), 1);
}

#[test]
fn test_validate_strict_lists_every_error() {
    let config = ProtocolConfig::default_with_overrides(|c| {
        c.server.address = String::new();
        c.server.max_sessions = 0;
    });
    match config.validate_strict() {
        Err(ProtocolError::ConfigError(msg)) => {
            assert!(msg.contains("cannot be empty"));
            assert!(msg.contains("Max sessions"));
        }
        other => panic!("Expected config error, got {other:?}"),
    }
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = ProtocolConfig::from_toml(
        r#"
        [server]
        delegate_handshake = true
        base_path = "/swaggersocket"
        long_poll_timeout = 1500

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("Partial TOML should parse");

    assert!(config.server.delegate_handshake);
    assert_eq!(config.server.base_path, "/swaggersocket");
    assert_eq!(config.server.long_poll_timeout, Duration::from_millis(1500));
    assert_eq!(config.server.address, "127.0.0.1:8080");
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.validate().is_empty());
}

#[test]
fn test_malformed_toml_is_config_error() {
    assert!(matches!(
        ProtocolConfig::from_toml("[server\naddress = 1"),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_example_config_round_trips_through_file() {
    let example = ProtocolConfig::example_config();
    let parsed = ProtocolConfig::from_toml(&example).expect("Example config should parse");
    assert!(parsed.validate().is_empty());

    let path = std::env::temp_dir().join(format!(
        "swaggersocket-config-{}.toml",
        std::process::id()
    ));
    parsed.save_to_file(&path).unwrap();
    let loaded = ProtocolConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.server.session_ttl, parsed.server.session_ttl);
    assert_eq!(loaded.server.max_message_size, parsed.server.max_message_size);
}

#[test]
fn test_missing_file_is_config_error() {
    assert!(matches!(
        ProtocolConfig::from_file("/definitely/not/here.toml"),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_env_overrides() {
    std::env::set_var("SWAGGERSOCKET_DELEGATE_HANDSHAKE", "sometimes");
    assert!(matches!(
        ProtocolConfig::from_env(),
        Err(ProtocolError::ConfigError(_))
    ));

    std::env::set_var("SWAGGERSOCKET_DELEGATE_HANDSHAKE", "true");
    std::env::set_var("SWAGGERSOCKET_LONG_POLL_TIMEOUT_MS", "2500");
    std::env::set_var("SWAGGERSOCKET_MAX_SESSIONS", "42");
    let config = ProtocolConfig::from_env().unwrap();
    assert!(config.server.delegate_handshake);
    assert_eq!(config.server.long_poll_timeout, Duration::from_millis(2500));
    assert_eq!(config.server.max_sessions, 42);

    for var in [
        "SWAGGERSOCKET_DELEGATE_HANDSHAKE",
        "SWAGGERSOCKET_LONG_POLL_TIMEOUT_MS",
        "SWAGGERSOCKET_MAX_SESSIONS",
    ] {
        std::env::remove_var(var);
    }
}
