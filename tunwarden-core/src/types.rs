//! Type definitions and wrappers for secure data handling
//!
//! Credentials are wrapped with the secrecy crate so they never show up in
//! logs or debug output while a session is being supervised.

use secrecy::{ExposeSecret, Secret};

/// Wrapper for a VPN account password or key passphrase
#[derive(Clone, Debug)]
pub struct Password(Secret<String>);

impl Password {
    pub fn new(password: String) -> Self {
        Self(Secret::new(password))
    }

    /// Expose the password value (use with caution!)
    ///
    /// Only call this when handing the value to the protocol engine.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<String> for Password {
    fn from(password: String) -> Self {
        Self::new(password)
    }
}

impl From<&str> for Password {
    fn from(password: &str) -> Self {
        Self::new(password.to_string())
    }
}

/// How the session authenticates against the gateway
///
/// There is exactly one mode per profile: a profile with credentials always
/// uses them, a profile without credentials is anonymous.
#[derive(Clone, Debug, Default)]
pub enum AuthMode {
    /// The payload carries everything needed (certificates, autologin)
    #[default]
    Anonymous,

    /// Username and password supplied to the engine
    Credentials { username: String, password: Password },
}

impl AuthMode {
    /// Build the mode from optional profile fields
    ///
    /// Both fields must be present and non-empty for credentials to be used.
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Self {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Self::Credentials {
                    username,
                    password: Password::new(password),
                }
            }
            _ => Self::Anonymous,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Credentials { username, .. } => Some(username),
        }
    }
}

/// Everything needed for one connect attempt
///
/// Supplied by the profile store once per attempt and never mutated while the
/// attempt runs.
#[derive(Clone, Debug, Default)]
pub struct SessionConfig {
    /// Display name of the selected profile
    pub name: String,

    /// Tunnel payload (e.g. the contents of an .ovpn file)
    pub payload: Vec<u8>,

    /// Authentication mode
    pub auth: AuthMode,

    /// Optional passphrase for an encrypted private key in the payload
    pub private_key_password: Option<Password>,

    /// DNS servers that override whatever the gateway pushes
    pub dns_override: Vec<String>,
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            payload,
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_dns(mut self, dns: Vec<String>) -> Self {
        self.dns_override = dns;
        self
    }

    pub fn with_private_key_password(mut self, password: Password) -> Self {
        self.private_key_password = Some(password);
        self
    }

    /// A config is usable only if it carries a non-blank payload
    pub fn is_empty(&self) -> bool {
        self.payload.iter().all(|b| b.is_ascii_whitespace())
    }
}
