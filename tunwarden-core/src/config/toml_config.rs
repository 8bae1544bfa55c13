//! TOML configuration file I/O
//!
//! Handles loading and saving profile files in the user's configuration
//! directory.

use crate::config::{ProfileConfig, SupervisorPolicy};
use crate::error::{ConfigError, TunnelError};
use crate::types::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Complete TOML configuration structure
///
/// A profile plus optional supervisor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Server profile
    pub profile: ProfileConfig,

    /// Supervisor policy (optional, defaults apply when absent)
    #[serde(default)]
    pub supervisor: Option<SupervisorPolicy>,
}

impl TomlConfig {
    pub fn new(profile: ProfileConfig, supervisor: Option<SupervisorPolicy>) -> Self {
        Self {
            profile,
            supervisor,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, TunnelError> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TunnelError::Config(ConfigError::LoadFailed {
                path: path.to_string_lossy().to_string(),
            }),
            _ => TunnelError::Config(ConfigError::IoError {
                message: format!("Failed to read config file: {}", e),
            }),
        })?;

        let config: TomlConfig = toml::from_str(&contents).map_err(|e| {
            TunnelError::Config(ConfigError::ValidationError {
                message: format!("Failed to parse config file: {}", e),
            })
        })?;

        config.profile.validate().map_err(|message| {
            warn!("Profile validation failed: {}", message);
            TunnelError::Config(ConfigError::ValidationError { message })
        })?;

        if let Some(ref policy) = config.supervisor {
            debug!("Validating supervisor policy from config");

            policy.validate().map_err(|e| {
                warn!("Supervisor policy validation failed: {}", e);
                TunnelError::Config(ConfigError::ValidationError {
                    message: format!("Invalid supervisor policy: {}", e),
                })
            })?;

            info!(
                "Loaded supervisor policy: connect_timeout={}s, retry_delay={}ms, reachability_backoff={}s, detector={}/{}",
                policy.connect_timeout_secs,
                policy.retry_delay_ms,
                policy.reachability_backoff_secs,
                policy.detector_threshold,
                policy.detector_window
            );
        } else {
            debug!("No supervisor policy specified in config, using defaults");
        }

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), TunnelError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            TunnelError::Config(ConfigError::ValidationError {
                message: format!("Failed to serialize config: {}", e),
            })
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TunnelError::Config(ConfigError::IoError {
                    message: format!("Failed to create config directory: {}", e),
                })
            })?;
        }

        std::fs::write(path, contents).map_err(|e| {
            TunnelError::Config(ConfigError::IoError {
                message: format!("Failed to write config file: {}", e),
            })
        })?;

        Ok(())
    }

    /// Get the supervisor policy, or the defaults if not configured
    pub fn policy(&self) -> SupervisorPolicy {
        self.supervisor.clone().unwrap_or_default()
    }
}

/// A profile file resolved into what a session needs
#[derive(Debug, Clone)]
pub struct LoadedProfile {
    pub session: SessionConfig,
    pub policy: SupervisorPolicy,
}

/// Load a profile file and read its tunnel payload
///
/// The payload path is resolved relative to the profile file. An empty
/// payload is a configuration error.
pub fn load_profile(path: &Path) -> Result<LoadedProfile, TunnelError> {
    let config = TomlConfig::from_file(path)?;
    let policy = config.policy();

    let payload_path = resolve_payload_path(path, &config.profile.config_file);
    let payload = std::fs::read(&payload_path).map_err(|_| {
        TunnelError::Config(ConfigError::LoadFailed {
            path: payload_path.to_string_lossy().to_string(),
        })
    })?;

    let session = config.profile.into_session_config(payload);
    if session.is_empty() {
        return Err(TunnelError::Config(ConfigError::MissingField {
            field: "config_file contents".to_string(),
        }));
    }

    info!(
        profile = %session.name,
        anonymous = session.auth.is_anonymous(),
        "Loaded profile from {:?}",
        path
    );

    Ok(LoadedProfile { session, policy })
}

fn resolve_payload_path(profile_path: &Path, config_file: &Path) -> PathBuf {
    if config_file.is_absolute() {
        return config_file.to_path_buf();
    }
    profile_path
        .parent()
        .map(|dir| dir.join(config_file))
        .unwrap_or_else(|| config_file.to_path_buf())
}

/// Default profile file name
const PROFILE_FILE_NAME: &str = "profile.toml";

/// Get the default configuration directory
///
/// Returns ~/.config/tunwarden, or TUNWARDEN_CONFIG_DIR if set
pub fn get_config_dir() -> Result<PathBuf, TunnelError> {
    if let Ok(config_dir) = std::env::var("TUNWARDEN_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| {
        TunnelError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("tunwarden"))
}

/// Get the default profile file path
pub fn get_profile_path() -> Result<PathBuf, TunnelError> {
    Ok(get_config_dir()?.join(PROFILE_FILE_NAME))
}
