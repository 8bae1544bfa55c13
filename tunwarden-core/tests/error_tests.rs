//! Unit tests for error types and conversions

use tunwarden_core::error::{ConfigError, EngineError, HostError, SessionError, TunnelError};

#[test]
fn test_session_error_display() {
    assert_eq!(
        SessionError::NoNetwork.to_string(),
        "No network connection available"
    );
    assert_eq!(
        SessionError::AlreadyActive {
            status: "connected".to_string()
        }
        .to_string(),
        "A session is already active (connected)"
    );
    assert_eq!(
        SessionError::EngineRejected {
            reason: "bad cipher".to_string()
        }
        .to_string(),
        "Engine rejected the configuration: bad cipher"
    );
}

#[test]
fn test_engine_error_constructors() {
    let fatal = EngineError::fatal("AUTH_FAILED");
    assert!(fatal.fatal);
    assert_eq!(fatal.to_string(), "AUTH_FAILED");

    let transient = EngineError::transient("TLS warning");
    assert!(!transient.fatal);
}

#[test]
fn test_host_error_display() {
    let error = HostError::SettingsRejected {
        reason: "interface busy".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Failed to apply network settings: interface busy"
    );
}

#[test]
fn test_tunnel_error_from_session() {
    let error: TunnelError = SessionError::StartInProgress.into();
    assert!(matches!(error, TunnelError::Session(SessionError::StartInProgress)));
    assert_eq!(
        error.to_string(),
        "Session error: A connect attempt is already in progress"
    );
}

#[test]
fn test_tunnel_error_from_config() {
    let config_error = ConfigError::MissingField {
        field: "config_file".to_string(),
    };
    let error: TunnelError = config_error.into();
    assert!(matches!(error, TunnelError::Config(_)));
}

#[test]
fn test_tunnel_error_from_io() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: TunnelError = io_error.into();
    assert!(matches!(error, TunnelError::Io(_)));
}

#[test]
fn test_tunnel_error_from_toml() {
    let toml_error: toml::de::Error =
        toml::from_str::<serde_json::Value>("invalid toml").unwrap_err();
    let error: TunnelError = toml_error.into();
    assert!(matches!(error, TunnelError::Toml(_)));
}

#[test]
fn test_tunnel_error_from_engine() {
    let error: TunnelError = EngineError::fatal("Exiting due to fatal error").into();
    assert_eq!(
        error.to_string(),
        "Engine error: Exiting due to fatal error"
    );
}
