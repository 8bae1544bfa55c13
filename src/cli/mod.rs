//! CLI command implementations
//!
//! This module contains the implementation of all CLI subcommands.

pub mod check_config;
pub mod connect;
pub mod control;
pub mod status;

use colored::Colorize;
use tunwarden_core::session::ConnectionStatus;

/// Status label colored by how healthy the tunnel is
pub(crate) fn paint_status(status: ConnectionStatus) -> colored::ColoredString {
    let label = status.label();
    match status {
        ConnectionStatus::Connected => label.green().bold(),
        ConnectionStatus::Connecting | ConnectionStatus::Reasserting => label.yellow(),
        ConnectionStatus::Disconnecting => label.yellow().dimmed(),
        ConnectionStatus::Disconnected => label.normal(),
        ConnectionStatus::Invalid => label.red(),
    }
}
