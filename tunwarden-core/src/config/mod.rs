//! Configuration module
//!
//! Supervisor tuning knobs and profile definitions, loaded from TOML files.

use crate::network::SettingsDefaults;
use crate::types::{AuthMode, Password, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

pub mod toml_config;

/// Timing and heuristic settings for session supervision
///
/// The defaults reproduce the product behavior: a 30 second connect deadline,
/// 3 timeout lines within the last 10 log entries, a 0.5 second retry delay
/// and a 5 second engine reconnect backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorPolicy {
    /// Deadline for a connect attempt to reach Connected
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay before a user-requested retry re-enters the connect path
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Backoff passed to the engine on transport reachability changes
    #[serde(default = "default_reachability_backoff")]
    pub reachability_backoff_secs: u64,

    /// Number of most recent log entries the failure detector inspects
    #[serde(default = "default_detector_window")]
    pub detector_window: usize,

    /// Timeout-pattern matches within the window that fail the attempt
    #[serde(default = "default_detector_threshold")]
    pub detector_threshold: usize,

    /// Resolvers used when neither the profile nor the engine supplies any
    #[serde(default = "default_dns")]
    pub default_dns: Vec<String>,

    /// MTU applied when the engine does not negotiate one
    #[serde(default = "default_mtu")]
    pub default_mtu: u16,

    /// Interval for polling the host connectivity source
    #[serde(default = "default_connectivity_poll")]
    pub connectivity_poll_secs: u64,

    /// Optional HTTP endpoint used as connectivity probe
    #[serde(default)]
    pub probe_endpoint: Option<String>,
}

fn default_connect_timeout() -> u64 {
    30
}
fn default_retry_delay() -> u64 {
    500
}
fn default_reachability_backoff() -> u64 {
    5
}
fn default_detector_window() -> usize {
    10
}
fn default_detector_threshold() -> usize {
    3
}
fn default_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string()]
}
fn default_mtu() -> u16 {
    1500
}
fn default_connectivity_poll() -> u64 {
    5
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            retry_delay_ms: default_retry_delay(),
            reachability_backoff_secs: default_reachability_backoff(),
            detector_window: default_detector_window(),
            detector_threshold: default_detector_threshold(),
            default_dns: default_dns(),
            default_mtu: default_mtu(),
            connectivity_poll_secs: default_connectivity_poll(),
            probe_endpoint: None,
        }
    }
}

impl SupervisorPolicy {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reachability_backoff(&self) -> Duration {
        Duration::from_secs(self.reachability_backoff_secs)
    }

    pub fn connectivity_poll(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs)
    }

    /// Fallbacks for network settings the engine leaves out
    pub fn settings_defaults(&self) -> SettingsDefaults {
        SettingsDefaults {
            dns: self.default_dns.clone(),
            mtu: self.default_mtu,
        }
    }

    /// Validate the entire policy
    ///
    /// # Returns
    ///
    /// * `Ok(())` if all fields are valid
    /// * `Err(PolicyValidationError)` with the first validation error encountered
    pub fn validate(&self) -> Result<(), PolicyValidationError> {
        self.validate_connect_timeout()?;
        self.validate_detector()?;
        self.validate_reachability_backoff()?;
        self.validate_mtu()?;
        self.validate_dns()?;
        self.validate_probe_endpoint()?;
        Ok(())
    }

    /// connect_timeout_secs must be within 1-600
    fn validate_connect_timeout(&self) -> Result<(), PolicyValidationError> {
        if self.connect_timeout_secs < 1 || self.connect_timeout_secs > 600 {
            Err(PolicyValidationError::InvalidConnectTimeout(
                self.connect_timeout_secs,
            ))
        } else {
            Ok(())
        }
    }

    fn validate_detector(&self) -> Result<(), PolicyValidationError> {
        if self.detector_threshold < 1 {
            return Err(PolicyValidationError::InvalidDetectorThreshold(
                self.detector_threshold,
            ));
        }
        if self.detector_window < self.detector_threshold {
            return Err(PolicyValidationError::WindowSmallerThanThreshold(
                self.detector_window,
                self.detector_threshold,
            ));
        }
        Ok(())
    }

    fn validate_reachability_backoff(&self) -> Result<(), PolicyValidationError> {
        if self.reachability_backoff_secs > 300 {
            Err(PolicyValidationError::InvalidReachabilityBackoff(
                self.reachability_backoff_secs,
            ))
        } else {
            Ok(())
        }
    }

    /// MTU must be within 576-9000
    fn validate_mtu(&self) -> Result<(), PolicyValidationError> {
        if !(576..=9000).contains(&self.default_mtu) {
            Err(PolicyValidationError::InvalidMtu(self.default_mtu))
        } else {
            Ok(())
        }
    }

    fn validate_dns(&self) -> Result<(), PolicyValidationError> {
        if self.default_dns.is_empty() {
            return Err(PolicyValidationError::InvalidDns("list is empty".to_string()));
        }
        for server in &self.default_dns {
            if server.parse::<IpAddr>().is_err() {
                return Err(PolicyValidationError::InvalidDns(server.clone()));
            }
        }
        Ok(())
    }

    /// Validate probe_endpoint is a valid HTTP/HTTPS URL when present
    fn validate_probe_endpoint(&self) -> Result<(), PolicyValidationError> {
        use url::Url;

        let Some(endpoint) = &self.probe_endpoint else {
            return Ok(());
        };

        match Url::parse(endpoint) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(()),
                scheme => Err(PolicyValidationError::InvalidEndpointUrl(format!(
                    "URL scheme must be http or https, got: {}",
                    scheme
                ))),
            },
            Err(e) => Err(PolicyValidationError::InvalidEndpointUrl(format!(
                "Failed to parse URL: {}",
                e
            ))),
        }
    }
}

/// Validation errors for SupervisorPolicy
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyValidationError {
    #[error("connect_timeout_secs must be between 1 and 600, got: {0}")]
    InvalidConnectTimeout(u64),

    #[error("detector_threshold must be at least 1, got: {0}")]
    InvalidDetectorThreshold(usize),

    #[error("detector_window ({0}) must be >= detector_threshold ({1})")]
    WindowSmallerThanThreshold(usize, usize),

    #[error("reachability_backoff_secs must be at most 300, got: {0}")]
    InvalidReachabilityBackoff(u64),

    #[error("default_mtu must be between 576 and 9000, got: {0}")]
    InvalidMtu(u16),

    #[error("default_dns entries must be IP addresses: {0}")]
    InvalidDns(String),

    #[error("probe_endpoint must be a valid HTTP/HTTPS URL: {0}")]
    InvalidEndpointUrl(String),
}

/// A server profile as stored on disk
///
/// The payload is referenced by path; credentials are optional and decide
/// the authentication mode on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Display name
    pub name: String,

    /// Path to the tunnel payload (.ovpn); relative paths resolve against
    /// the profile file's directory
    pub config_file: PathBuf,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub private_key_password: Option<String>,

    /// DNS override list
    #[serde(default)]
    pub dns: Vec<String>,
}

impl ProfileConfig {
    /// Validate the profile fields that do not need the filesystem
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Profile name cannot be empty".to_string());
        }

        if self.config_file.as_os_str().is_empty() {
            return Err("config_file cannot be empty".to_string());
        }

        if self.username.is_some() != self.password.is_some() {
            return Err("username and password must be set together".to_string());
        }

        for server in &self.dns {
            if server.parse::<IpAddr>().is_err() {
                return Err(format!("Invalid DNS server: {}", server));
            }
        }

        Ok(())
    }

    /// Combine the profile with its loaded payload into a session config
    pub fn into_session_config(self, payload: Vec<u8>) -> SessionConfig {
        let mut config = SessionConfig::new(self.name, payload)
            .with_auth(AuthMode::from_parts(self.username, self.password))
            .with_dns(self.dns);
        if let Some(passphrase) = self.private_key_password {
            config = config.with_private_key_password(Password::new(passphrase));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = SupervisorPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.connect_timeout(), Duration::from_secs(30));
        assert_eq!(policy.retry_delay(), Duration::from_millis(500));
        assert_eq!(policy.reachability_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_window_must_cover_threshold() {
        let policy = SupervisorPolicy {
            detector_window: 2,
            detector_threshold: 3,
            ..Default::default()
        };
        assert_eq!(
            policy.validate(),
            Err(PolicyValidationError::WindowSmallerThanThreshold(2, 3))
        );
    }

    #[test]
    fn test_probe_endpoint_scheme() {
        let policy = SupervisorPolicy {
            probe_endpoint: Some("ftp://example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(PolicyValidationError::InvalidEndpointUrl(_))
        ));
    }

    #[test]
    fn test_profile_credentials_must_be_paired() {
        let profile = ProfileConfig {
            name: "Frankfurt".to_string(),
            config_file: PathBuf::from("de.ovpn"),
            username: Some("user".to_string()),
            password: None,
            private_key_password: None,
            dns: vec![],
        };
        assert!(profile.validate().is_err());
    }
}
