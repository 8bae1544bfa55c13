//! Tunnel host (the OS side of the tunnel)
//!
//! The host owns the virtual interface. It applies negotiated network
//! settings, hands out the packet flow and can be told to tear the tunnel
//! down after an unsolicited failure.

use crate::engine::PacketFlow;
use crate::error::{EngineError, HostError};
use crate::network::NetworkSettings;
use tracing::{info, warn};

/// Host services used by the tunnel provider
pub trait TunnelHost: Send {
    /// Apply settings to the tunnel interface
    fn apply_network_settings(&mut self, settings: &NetworkSettings) -> Result<(), HostError>;

    /// The packet flow the engine reads and writes
    fn packet_flow(&self) -> PacketFlow;

    /// The session failed outside of any start request
    fn cancel_tunnel(&mut self, error: &EngineError);
}

/// Host that records applied settings in the process log
///
/// Used by the command-line frontend, where the engine process configures the
/// interface itself.
#[derive(Debug, Default)]
pub struct LoggingHost {
    applied: Option<NetworkSettings>,
    cancelled: bool,
}

impl LoggingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Option<&NetworkSettings> {
        self.applied.as_ref()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl TunnelHost for LoggingHost {
    fn apply_network_settings(&mut self, settings: &NetworkSettings) -> Result<(), HostError> {
        let dns = settings
            .dns
            .as_ref()
            .map(|dns| dns.servers.join(", "))
            .unwrap_or_default();
        info!(
            remote = settings.remote_address.as_deref().unwrap_or("-"),
            dns = %dns,
            mtu = settings.mtu,
            "Network settings applied"
        );
        self.applied = Some(settings.clone());
        Ok(())
    }

    fn packet_flow(&self) -> PacketFlow {
        PacketFlow::new(std::process::id() as u64)
    }

    fn cancel_tunnel(&mut self, error: &EngineError) {
        warn!("Tunnel cancelled: {}", error);
        self.cancelled = true;
    }
}
