//! Connection status state machine
//!
//! Holds the one authoritative `ConnectionStatus` and the table of legal
//! transitions. Every change is published on a watch channel so readers in
//! other tasks always see a whole value.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Session status as seen by every other component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No configuration has been loaded yet
    #[default]
    Invalid,

    /// Not connected
    Disconnected,

    /// A connect attempt is running
    Connecting,

    /// Tunnel is up
    Connected,

    /// The engine is re-establishing the tunnel on its own
    Reasserting,

    /// Tearing the tunnel down
    Disconnecting,
}

impl ConnectionStatus {
    /// Short label for status displays
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Invalid => "Invalid",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Reasserting => "Reconnecting...",
            ConnectionStatus::Disconnecting => "Disconnecting...",
        }
    }

    /// States in which the connect deadline and the log detector are live
    pub fn is_attempting(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Reasserting)
    }

    /// Any state that is neither settled up nor settled down
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Reasserting
                | ConnectionStatus::Disconnecting
        )
    }

    /// States with a live engine session
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reasserting
                | ConnectionStatus::Disconnecting
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionStatus::Invalid => "invalid",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reasserting => "reasserting",
            ConnectionStatus::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Inputs that can move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Profile configuration is available
    ConfigurationLoaded,
    /// A start request was accepted
    StartAccepted,
    /// Engine reports the tunnel is up
    EngineConnected,
    /// Engine is reconnecting internally
    EngineReconnecting,
    /// A stop was requested
    StopRequested,
    /// Engine reports the tunnel is down
    EngineDisconnected,
    /// Fatal error, forced failure or cancellation
    Terminated,
}

/// The transition table
///
/// Returns `None` for any (state, trigger) pair without a defined edge.
pub fn next_status(from: ConnectionStatus, trigger: Trigger) -> Option<ConnectionStatus> {
    use ConnectionStatus::*;

    match (from, trigger) {
        (Invalid, Trigger::ConfigurationLoaded) => Some(Disconnected),
        (Disconnected, Trigger::StartAccepted) => Some(Connecting),
        (Connecting | Reasserting, Trigger::EngineConnected) => Some(Connected),
        (Connecting | Connected, Trigger::EngineReconnecting) => Some(Reasserting),
        (Connecting | Connected | Reasserting, Trigger::StopRequested) => Some(Disconnecting),
        (Connecting | Connected | Reasserting | Disconnecting, Trigger::EngineDisconnected) => {
            Some(Disconnected)
        }
        (Invalid | Connecting | Connected | Reasserting | Disconnecting, Trigger::Terminated) => {
            Some(Disconnected)
        }
        _ => None,
    }
}

/// A trigger arrived that has no edge from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no transition from {from} on {trigger:?}")]
pub struct UndefinedTransition {
    pub from: ConnectionStatus,
    pub trigger: Trigger,
}

/// Owner of the current status
///
/// Only the session supervisor holds one; everybody else reads through
/// `subscribe()`.
#[derive(Debug)]
pub struct StateMachine {
    status: ConnectionStatus,
    publisher: watch::Sender<ConnectionStatus>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(ConnectionStatus::Invalid);
        Self {
            status: ConnectionStatus::Invalid,
            publisher,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Receiver that always yields a complete status value
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.publisher.subscribe()
    }

    /// Apply a trigger
    ///
    /// On an undefined edge the status is left untouched and the trigger is
    /// reported back to the caller, who logs it.
    pub fn apply(&mut self, trigger: Trigger) -> Result<ConnectionStatus, UndefinedTransition> {
        let from = self.status;
        match next_status(from, trigger) {
            Some(to) => {
                debug!(%from, %to, ?trigger, "Status transition");
                self.status = to;
                self.publisher.send_replace(to);
                Ok(to)
            }
            None => {
                warn!(%from, ?trigger, "Ignoring trigger with no transition");
                Err(UndefinedTransition { from, trigger })
            }
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
