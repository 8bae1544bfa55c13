//! Tunnel network settings
//!
//! The engine proposes settings; the tunnel provider fills the gaps with
//! defaults before handing them to the host.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// A destination network in CIDR form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: IpAddr,
    pub prefix_len: u8,
}

impl Route {
    pub fn new(destination: IpAddr, prefix_len: u8) -> Self {
        Self {
            destination,
            prefix_len,
        }
    }

    /// 0.0.0.0/0
    pub fn default_ipv4() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.destination, self.prefix_len)
    }
}

/// Per address family settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpSettings {
    pub addresses: Vec<IpAddr>,
    pub included_routes: Vec<Route>,
    pub excluded_routes: Vec<Route>,
}

/// DNS configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsSettings {
    pub servers: Vec<String>,

    /// `[""]` routes every domain through these servers
    pub match_domains: Vec<String>,
}

/// Settings negotiated for the tunnel interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkSettings {
    /// Gateway address as signaled by the engine
    pub remote_address: Option<String>,
    pub ipv4: Option<IpSettings>,
    pub ipv6: Option<IpSettings>,
    pub dns: Option<DnsSettings>,
    pub mtu: Option<u16>,
}

/// Fallback values applied by `merge_defaults`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsDefaults {
    pub dns: Vec<String>,
    pub mtu: u16,
}

impl Default for SettingsDefaults {
    fn default() -> Self {
        Self {
            dns: vec!["8.8.8.8".to_string()],
            mtu: 1500,
        }
    }
}

/// Fill in what the engine left out
///
/// DNS: a non-empty profile override wins, then whatever the engine pushed,
/// then the default resolvers; all domains are matched. IPv4: the default
/// route is added to whatever routes the engine supplied. MTU: the engine's
/// value, else the default. The remote address and the engine's routes are
/// carried over untouched.
pub fn merge_defaults(
    mut settings: NetworkSettings,
    dns_override: &[String],
    defaults: &SettingsDefaults,
) -> NetworkSettings {
    let engine_dns = settings
        .dns
        .take()
        .map(|dns| dns.servers)
        .filter(|servers| !servers.is_empty());

    let servers = if !dns_override.is_empty() {
        dns_override.to_vec()
    } else {
        engine_dns.unwrap_or_else(|| defaults.dns.clone())
    };

    settings.dns = Some(DnsSettings {
        servers,
        match_domains: vec![String::new()],
    });

    if let Some(ipv4) = settings.ipv4.as_mut() {
        if !ipv4.included_routes.iter().any(Route::is_default) {
            ipv4.included_routes.insert(0, Route::default_ipv4());
        }
    }

    if settings.mtu.is_none() {
        settings.mtu = Some(defaults.mtu);
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings_get_defaults() {
        let merged = merge_defaults(NetworkSettings::default(), &[], &SettingsDefaults::default());
        assert_eq!(merged.mtu, Some(1500));
        let dns = merged.dns.unwrap();
        assert_eq!(dns.servers, vec!["8.8.8.8".to_string()]);
        assert_eq!(dns.match_domains, vec![String::new()]);
    }

    #[test]
    fn test_override_beats_engine_dns() {
        let settings = NetworkSettings {
            dns: Some(DnsSettings {
                servers: vec!["10.8.0.1".to_string()],
                match_domains: vec![],
            }),
            ..Default::default()
        };

        let merged = merge_defaults(settings.clone(), &["9.9.9.9".to_string()], &SettingsDefaults::default());
        assert_eq!(merged.dns.unwrap().servers, vec!["9.9.9.9".to_string()]);

        let merged = merge_defaults(settings, &[], &SettingsDefaults::default());
        assert_eq!(merged.dns.unwrap().servers, vec!["10.8.0.1".to_string()]);
    }

    #[test]
    fn test_engine_routes_and_remote_are_kept() {
        let lan = Route::new("192.168.0.0".parse().unwrap(), 16);
        let settings = NetworkSettings {
            remote_address: Some("203.0.113.7".to_string()),
            ipv4: Some(IpSettings {
                addresses: vec!["10.8.0.2".parse().unwrap()],
                included_routes: vec![Route::new("10.8.0.0".parse().unwrap(), 24)],
                excluded_routes: vec![lan.clone()],
            }),
            mtu: Some(1400),
            ..Default::default()
        };

        let merged = merge_defaults(settings, &[], &SettingsDefaults::default());
        assert_eq!(merged.remote_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(merged.mtu, Some(1400));

        let ipv4 = merged.ipv4.unwrap();
        assert_eq!(ipv4.included_routes.len(), 2);
        assert!(ipv4.included_routes[0].is_default());
        assert_eq!(ipv4.excluded_routes, vec![lan]);
    }
}
