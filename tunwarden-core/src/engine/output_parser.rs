//! Pattern-based parser for OpenVPN output
//!
//! Turns individual OpenVPN log lines into engine events, pushed network
//! settings and fatal errors. Every line is also forwarded verbatim to the
//! session log by the engine; the parser only adds structure.

use crate::engine::EngineEvent;
use crate::error::EngineError;
use crate::network::{DnsSettings, IpSettings, NetworkSettings, Route};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};

/// What a single line of OpenVPN output means
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// A lifecycle event
    Event(EngineEvent),
    /// Address of the gateway the control channel is talking to
    Peer(String),
    /// Settings pushed by the gateway
    PushReply(NetworkSettings),
    /// The process is about to give up
    Error(EngineError),
    /// Plain output with no structural meaning
    Output,
}

/// Parser for OpenVPN stdout/stderr
pub struct OutputParser {
    /// "Initialization Sequence Completed"
    connected_pattern: Regex,
    /// Soft restarts: "SIGUSR1[soft,ping-restart] received" or "Restart pause"
    restart_pattern: Regex,
    /// "Peer Connection Initiated with [AF_INET]203.0.113.7:1194"
    peer_pattern: Regex,
    /// "PUSH: Received control message: 'PUSH_REPLY,...'"
    push_reply_pattern: Regex,
    /// "AUTH: Received control message: AUTH_FAILED"
    auth_failed_pattern: Regex,
    /// Conditions after which OpenVPN exits on its own
    fatal_pattern: Regex,
}

impl OutputParser {
    /// Create a new OutputParser with compiled regex patterns
    pub fn new() -> Self {
        Self {
            connected_pattern: Regex::new(r"Initialization Sequence Completed")
                .expect("Failed to compile connected pattern"),
            restart_pattern: Regex::new(r"SIGUSR1\[soft|Restart pause")
                .expect("Failed to compile restart pattern"),
            peer_pattern: Regex::new(
                r"Peer Connection Initiated with \[AF_INET6?\]\[?([0-9A-Fa-f.:]+)\]?:(\d+)",
            )
            .expect("Failed to compile peer pattern"),
            push_reply_pattern: Regex::new(r"PUSH_REPLY,([^']*)")
                .expect("Failed to compile push_reply pattern"),
            auth_failed_pattern: Regex::new(r"AUTH_FAILED")
                .expect("Failed to compile auth_failed pattern"),
            fatal_pattern: Regex::new(
                r"Exiting due to fatal error|Cannot open TUN/TAP dev|Options error:",
            )
            .expect("Failed to compile fatal pattern"),
        }
    }

    /// Classify one line of output
    pub fn parse_line(&self, line: &str) -> ParsedLine {
        if self.connected_pattern.is_match(line) {
            return ParsedLine::Event(EngineEvent::Connected);
        }

        if self.restart_pattern.is_match(line) {
            return ParsedLine::Event(EngineEvent::Reconnecting);
        }

        if let Some(captures) = self.peer_pattern.captures(line) {
            if let Some(address) = captures.get(1) {
                return ParsedLine::Peer(address.as_str().to_string());
            }
        }

        if let Some(captures) = self.push_reply_pattern.captures(line) {
            let options = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            return ParsedLine::PushReply(parse_push_options(options));
        }

        if self.auth_failed_pattern.is_match(line) {
            // OpenVPN exits right after this unless auth-retry is set.
            return ParsedLine::Error(EngineError::fatal(format!(
                "AUTH_FAILED: {}",
                line.trim()
            )));
        }

        if self.fatal_pattern.is_match(line) {
            return ParsedLine::Error(EngineError::fatal(line.trim().to_string()));
        }

        ParsedLine::Output
    }
}

impl Default for OutputParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Build network settings from a comma separated PUSH_REPLY option list
pub fn parse_push_options(options: &str) -> NetworkSettings {
    let mut settings = NetworkSettings::default();
    let mut ipv4 = IpSettings::default();
    let mut ipv6 = IpSettings::default();
    let mut dns = Vec::new();

    for option in options.split(',') {
        let words: Vec<&str> = option.split_whitespace().collect();
        match words.as_slice() {
            ["ifconfig", address, mask] => {
                if let Ok(address) = address.parse::<Ipv4Addr>() {
                    ipv4.addresses.push(IpAddr::V4(address));
                    if let Some(prefix) = mask.parse::<Ipv4Addr>().ok().and_then(netmask_prefix) {
                        ipv4.included_routes.push(Route::new(
                            IpAddr::V4(network_of(address, prefix)),
                            prefix,
                        ));
                    }
                }
            }
            ["ifconfig-ipv6", cidr, ..] => {
                if let Some(route) = parse_cidr(cidr) {
                    ipv6.addresses.push(route.destination);
                }
            }
            ["route", network] => {
                if let Ok(network) = network.parse::<Ipv4Addr>() {
                    ipv4.included_routes.push(Route::new(IpAddr::V4(network), 32));
                }
            }
            ["route", network, mask, ..] => {
                let network = network.parse::<Ipv4Addr>().ok();
                let prefix = mask.parse::<Ipv4Addr>().ok().and_then(netmask_prefix);
                if let (Some(network), Some(prefix)) = (network, prefix) {
                    ipv4.included_routes.push(Route::new(IpAddr::V4(network), prefix));
                }
            }
            ["route-ipv6", cidr, ..] => {
                if let Some(route) = parse_cidr(cidr) {
                    ipv6.included_routes.push(route);
                }
            }
            ["dhcp-option", "DNS" | "DNS6", server] => dns.push(server.to_string()),
            ["tun-mtu", mtu] => settings.mtu = mtu.parse().ok(),
            _ => {}
        }
    }

    if ipv4 != IpSettings::default() {
        settings.ipv4 = Some(ipv4);
    }
    if ipv6 != IpSettings::default() {
        settings.ipv6 = Some(ipv6);
    }
    if !dns.is_empty() {
        settings.dns = Some(DnsSettings {
            servers: dns,
            match_domains: Vec::new(),
        });
    }

    settings
}

/// Prefix length of a contiguous netmask
fn netmask_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) == 0 {
        Some(prefix as u8)
    } else {
        None
    }
}

fn network_of(address: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
    Ipv4Addr::from(u32::from(address) & mask)
}

fn parse_cidr(cidr: &str) -> Option<Route> {
    let (address, prefix) = cidr.split_once('/')?;
    Some(Route::new(address.parse().ok()?, prefix.parse().ok()?))
}
