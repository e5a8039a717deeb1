//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tether_net::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, FIRST_CONNECTION_ID, MAX_BODY_SIZE,
};
use tether_net::error::NetError;
use serial_test::serial;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_defaults_match_protocol_constants() {
    let config = NetworkConfig::default();
    assert_eq!(config.server.first_connection_id, FIRST_CONNECTION_ID);
    assert_eq!(config.server.max_body_size, MAX_BODY_SIZE);
    assert_eq!(config.client.max_body_size, MAX_BODY_SIZE);
    assert_eq!(
        config.server.bind_address,
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    );
}

#[test]
fn test_zero_first_connection_id() {
    let mut config = NetworkConfig::default();
    config.server.first_connection_id = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("First connection id must be greater than 0")));
}

#[test]
fn test_zero_server_body_size() {
    let mut config = NetworkConfig::default();
    config.server.max_body_size = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Server max body size cannot be 0")));
}

#[test]
fn test_short_handshake_timeout() {
    let mut config = NetworkConfig::default();
    config.server.handshake_timeout = Duration::from_millis(5);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Handshake timeout too short")));
}

#[test]
fn test_long_handshake_timeout() {
    let mut config = NetworkConfig::default();
    config.server.handshake_timeout = Duration::from_secs(400);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Handshake timeout too long")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.server.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_high_max_connections_warning() {
    let mut config = NetworkConfig::default();
    config.server.max_connections = 150_000;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections very high")));
}

#[test]
fn test_short_connect_timeout() {
    let mut config = NetworkConfig::default();
    config.client.connect_timeout = Duration::from_millis(1);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Connect timeout too short")));
}

#[test]
fn test_zero_client_body_size() {
    let config = ClientConfig {
        max_body_size: 0,
        ..ClientConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Client max body size cannot be 0")));
}

#[test]
#[cfg(target_pointer_width = "64")]
fn test_client_body_size_must_fit_size_field() {
    let config = ClientConfig {
        max_body_size: u32::MAX as usize + 1,
        ..ClientConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Client max body size too large")));

    let at_limit = ClientConfig {
        max_body_size: u32::MAX as usize,
        ..ClientConfig::default()
    };
    assert!(at_limit.validate().is_empty());
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_multiple_errors_are_collected() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.max_connections = 0;
        c.client.max_body_size = 0;
        c.logging.app_name = String::new();
    });

    assert_eq!(config.validate().len(), 3);
}

#[test]
fn test_validate_strict_reports_every_error() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.first_connection_id = 0;
        c.server.max_body_size = 0;
    });

    match config.validate_strict() {
        Err(NetError::ConfigError(msg)) => {
            assert!(msg.contains("First connection id"));
            assert!(msg.contains("Server max body size"));
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_partial_toml_falls_back_to_defaults() {
    let toml = r#"
        [server]
        bind_address = "127.0.0.1"
        max_connections = 8

        [client]
        connect_timeout = 250

        [logging]
        log_level = "debug"
    "#;

    let config = NetworkConfig::from_toml(toml).expect("partial config should parse");
    assert_eq!(
        config.server.bind_address,
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    );
    assert_eq!(config.server.max_connections, 8);
    assert_eq!(config.server.first_connection_id, FIRST_CONNECTION_ID);
    assert_eq!(config.client.connect_timeout, Duration::from_millis(250));
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.validate().is_empty());
}

#[test]
fn test_invalid_toml_is_a_config_error() {
    let err = NetworkConfig::from_toml("[server\nmax_connections = ").unwrap_err();
    assert!(matches!(err, NetError::ConfigError(_)));

    let err = NetworkConfig::from_toml("[logging]\nlog_level = \"loud\"").unwrap_err();
    assert!(err.to_string().contains("Invalid log level"));
}

#[test]
fn test_example_config_round_trips() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).expect("example config should parse");

    assert_eq!(parsed.server.max_body_size, MAX_BODY_SIZE);
    assert_eq!(
        parsed.server.handshake_timeout,
        ServerConfig::default().handshake_timeout
    );
    assert_eq!(parsed.logging.app_name, LoggingConfig::default().app_name);
}

#[test]
fn test_missing_file_is_a_config_error() {
    let err = NetworkConfig::from_file("/nonexistent/tether.toml").unwrap_err();
    assert!(matches!(err, NetError::ConfigError(_)));
}

#[test]
#[serial]
fn test_from_env_overrides_defaults() {
    std::env::set_var("TETHER_MAX_BODY_SIZE", "4096");
    std::env::set_var("TETHER_HANDSHAKE_TIMEOUT_MS", "750");
    let config = NetworkConfig::from_env().expect("env config should load");
    std::env::remove_var("TETHER_MAX_BODY_SIZE");
    std::env::remove_var("TETHER_HANDSHAKE_TIMEOUT_MS");

    assert_eq!(config.server.max_body_size, 4096);
    assert_eq!(config.client.max_body_size, 4096);
    assert_eq!(config.server.handshake_timeout, Duration::from_millis(750));
    assert_eq!(config.client.handshake_timeout, Duration::from_millis(750));
}

#[test]
#[serial]
fn test_from_env_rejects_bad_bind_address() {
    std::env::set_var("TETHER_SERVER_BIND_ADDRESS", "not-an-ip");
    let result = NetworkConfig::from_env();
    std::env::remove_var("TETHER_SERVER_BIND_ADDRESS");

    assert!(matches!(result, Err(NetError::ConfigError(_))));
}
