//! Events published to upper layers
//!
//! Subscribers register explicitly through the supervisor handle and receive
//! these over a broadcast channel.

use crate::session::state::ConnectionStatus;
use serde::{Deserialize, Serialize};

/// Why a connect attempt or session was forcibly ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Connect deadline elapsed
    Timeout,
    /// Gateway rejected the credentials
    AuthenticationFailed,
    /// Gateway certificate did not verify
    CertificateInvalid,
    /// Gateway refused the transport connection
    ConnectionRefused,
    /// Repeated timeouts from the gateway
    ServerUnresponsive(String),
    /// Host lost network connectivity while connected
    NetworkLost,
}

impl FailureReason {
    /// Human-readable reason for alerts
    pub fn message(&self) -> String {
        match self {
            FailureReason::Timeout => {
                "Connection timed out. The server is not responding.".to_string()
            }
            FailureReason::AuthenticationFailed => {
                "Authentication failed. Please check your credentials.".to_string()
            }
            FailureReason::CertificateInvalid => "Certificate verification failed.".to_string(),
            FailureReason::ConnectionRefused => "Connection refused by the server.".to_string(),
            FailureReason::ServerUnresponsive(detail) => {
                format!("Server not responding. {}.", detail.trim_end_matches('.'))
            }
            FailureReason::NetworkLost => {
                "Your internet connection was lost. The VPN has been disconnected.".to_string()
            }
        }
    }

    /// Stable machine-readable category
    pub fn category(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::AuthenticationFailed => "authentication_failed",
            FailureReason::CertificateInvalid => "certificate_invalid",
            FailureReason::ConnectionRefused => "connection_refused",
            FailureReason::ServerUnresponsive(_) => "server_unresponsive",
            FailureReason::NetworkLost => "network_lost",
        }
    }

    /// Whether picking a different server is the better next step than retrying
    pub fn suggests_other_server(&self) -> bool {
        matches!(
            self,
            FailureReason::CertificateInvalid
                | FailureReason::ConnectionRefused
                | FailureReason::ServerUnresponsive(_)
                | FailureReason::Timeout
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Upstream notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The authoritative status changed
    StatusChanged(ConnectionStatus),

    /// An attempt or session was force-failed (emitted once per attempt)
    ConnectionFailed(FailureReason),

    /// Host has no network; shown separately from connection failures
    NoInternetAlert(String),

    /// Network came back; any outstanding no-internet alert can go away
    NoInternetDismissed,
}

/// Alert text when the user tries to connect while offline
pub const NO_INTERNET_BEFORE_CONNECT: &str =
    "Please connect to the internet before connecting to VPN.";

/// Alert text when connectivity drops
pub const NO_INTERNET_LOST: &str =
    "Your internet connection was lost. The VPN has been disconnected.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_unresponsive_message() {
        let reason = FailureReason::ServerUnresponsive("Multiple connection attempts failed".into());
        assert_eq!(
            reason.message(),
            "Server not responding. Multiple connection attempts failed."
        );
        assert_eq!(reason.category(), "server_unresponsive");
    }

    #[test]
    fn test_retry_versus_other_server() {
        assert!(!FailureReason::AuthenticationFailed.suggests_other_server());
        assert!(!FailureReason::NetworkLost.suggests_other_server());
        assert!(FailureReason::ConnectionRefused.suggests_other_server());
    }
}
