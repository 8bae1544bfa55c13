//! Session supervision
//!
//! The supervisor owns the connection status and drives the tunnel provider;
//! the other modules are the pieces it is built from.

pub mod detector;
pub mod events;
pub mod guardian;
pub mod provider;
pub mod reconnect;
pub mod state;
pub mod supervisor;
pub mod timer;

pub use detector::{FailureDetector, PatternDetector, PatternRule};
pub use events::{FailureReason, SessionEvent};
pub use provider::{StartTicket, StopTicket, TunnelProvider};
pub use state::{ConnectionStatus, StateMachine, Trigger};
pub use supervisor::{SessionSnapshot, Supervisor, SupervisorHandle};
