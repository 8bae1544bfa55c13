//! Protocol engine contract
//!
//! The engine performs the handshake and packet encapsulation. The
//! supervisor only drives it through `ProtocolEngine` and hears back from it
//! through an `EngineSink`.

use crate::error::EngineError;
use crate::network::NetworkSettings;
use crate::types::{Password, SessionConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub mod openvpn;
pub mod output_parser;

pub use openvpn::OpenVpnEngine;
pub use output_parser::OutputParser;

/// Opaque handle to the host's packet flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketFlow(u64);

impl PacketFlow {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Lifecycle events reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Tunnel is established
    Connected,
    /// Tunnel is down
    Disconnected,
    /// Engine is re-establishing the tunnel
    Reconnecting,
    /// Any other engine event, kept for the log
    Other(String),
}

/// Reachability of the underlying transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    NotReachable,
    ReachableViaWifi,
    ReachableViaWired,
    ReachableViaCellular,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Reachability::NotReachable)
    }
}

/// What the engine made of the supplied configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationEvaluation {
    /// Credentials are embedded in the payload; do not supply them
    pub autologin: bool,

    /// Gateway host named by the payload, if any
    pub remote_host: Option<String>,
}

/// Everything an engine can tell the supervisor
#[derive(Debug)]
pub enum EngineMessage {
    Event(EngineEvent),
    Error(EngineError),
    Log(String),
    /// Network settings negotiation; answer with a packet flow or none
    ConfigureTunnel {
        settings: NetworkSettings,
        reply: oneshot::Sender<Option<PacketFlow>>,
    },
}

type Deliver = Arc<dyn Fn(u64, EngineMessage) + Send + Sync>;

/// Channel back from the engine into the supervisor
///
/// Each sink is bound to one session; messages from a session that has since
/// been replaced are discarded by the receiver.
#[derive(Clone)]
pub struct EngineSink {
    session: u64,
    deliver: Deliver,
}

impl EngineSink {
    /// Create a sink from a delivery function taking (session, message)
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(u64, EngineMessage) + Send + Sync + 'static,
    {
        Self {
            session: 0,
            deliver: Arc::new(deliver),
        }
    }

    /// A copy of this sink bound to another session
    pub fn for_session(&self, session: u64) -> Self {
        Self {
            session,
            deliver: Arc::clone(&self.deliver),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn event(&self, event: EngineEvent) {
        (self.deliver)(self.session, EngineMessage::Event(event));
    }

    pub fn error(&self, error: EngineError) {
        (self.deliver)(self.session, EngineMessage::Error(error));
    }

    pub fn log(&self, text: impl Into<String>) {
        (self.deliver)(self.session, EngineMessage::Log(text.into()));
    }

    /// Ask the host to apply network settings
    ///
    /// The receiver yields the packet flow once the host has applied them, or
    /// `None` if it could not.
    pub fn configure_tunnel(&self, settings: NetworkSettings) -> oneshot::Receiver<Option<PacketFlow>> {
        let (reply, rx) = oneshot::channel();
        (self.deliver)(self.session, EngineMessage::ConfigureTunnel { settings, reply });
        rx
    }
}

impl fmt::Debug for EngineSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSink")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// The protocol engine as the tunnel provider sees it
pub trait ProtocolEngine: Send {
    /// Evaluate the tunnel payload before connecting
    fn apply_configuration(
        &mut self,
        config: &SessionConfig,
    ) -> Result<ConfigurationEvaluation, EngineError>;

    /// Supply username/password credentials
    fn provide_credentials(&mut self, username: &str, password: &Password)
        -> Result<(), EngineError>;

    /// Start connecting; progress is reported through `sink`
    fn connect(&mut self, flow: PacketFlow, sink: EngineSink);

    /// Tear the tunnel down; completion is reported as `Disconnected`
    fn disconnect(&mut self);

    /// Re-establish the tunnel after `after`
    fn reconnect(&mut self, after: Duration);

    /// Free-text description of the current connection, for diagnostics
    fn connection_info(&self) -> Option<String> {
        None
    }
}
