//! Error types for the tunwarden session supervisor
//!
//! This module defines all error types used throughout the crate. Rejections
//! are returned synchronously to callers and never reach the failure event
//! stream; engine and host errors describe collaborator failures.

use thiserror::Error;

/// Main error type for the tunwarden application
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Synchronous rejection of a session request
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Errors reported by the protocol engine
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Errors reported by the tunnel host
    #[error("Tunnel host error: {0}")]
    Host(#[from] HostError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Requests rejected before anything is started
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Tunnel configuration is missing or empty")]
    ConfigMissing,

    #[error("No server profile is selected")]
    NoProfileSelected,

    #[error("No network connection available")]
    NoNetwork,

    #[error("A connect attempt is already in progress")]
    StartInProgress,

    #[error("A disconnect is already in progress")]
    StopInProgress,

    #[error("A session is already active ({status})")]
    AlreadyActive { status: String },

    #[error("Engine rejected the configuration: {reason}")]
    EngineRejected { reason: String },

    #[error("Session supervisor is no longer running")]
    SupervisorGone,
}

/// Errors reported by the protocol engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    /// Engine-provided description
    pub message: String,

    /// Whether the engine considers the session unrecoverable
    pub fatal: bool,
}

impl EngineError {
    /// Create a fatal engine error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    /// Create a non-fatal engine error
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }
}

/// Tunnel host (OS side) errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Failed to apply network settings: {reason}")]
    SettingsRejected { reason: String },

    #[error("Packet flow unavailable")]
    FlowUnavailable,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TunnelError>;
