//! Host connectivity via NetworkManager over D-Bus

use crate::network::spawn_poller;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use zbus::Connection;

/// NM_STATE_CONNECTED_GLOBAL
const NM_STATE_CONNECTED_GLOBAL: u32 = 70;

/// Reads the global connectivity state from NetworkManager
pub struct NetworkMonitor {
    connection: Connection,
}

impl NetworkMonitor {
    /// Connect to the system bus and make sure NetworkManager is there
    #[tracing::instrument]
    pub async fn new() -> Result<Self, NetworkMonitorError> {
        let connection = Connection::system().await?;

        let proxy = zbus::fdo::DBusProxy::new(&connection).await?;
        let bus_name = zbus::names::BusName::try_from("org.freedesktop.NetworkManager")
            .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;
        let name_has_owner = proxy
            .name_has_owner(bus_name)
            .await
            .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;

        if !name_has_owner {
            return Err(NetworkMonitorError::NetworkManagerUnavailable);
        }

        Ok(Self { connection })
    }

    /// Whether NetworkManager reports full (global) connectivity
    #[tracing::instrument(skip(self))]
    pub async fn is_network_available(&self) -> Result<bool, NetworkMonitorError> {
        let proxy = zbus::Proxy::new(
            &self.connection,
            "org.freedesktop.NetworkManager",
            "/org/freedesktop/NetworkManager",
            "org.freedesktop.NetworkManager",
        )
        .await?;

        let state: u32 = proxy
            .get_property("State")
            .await
            .map_err(|e| NetworkMonitorError::QueryFailed(e.to_string()))?;

        Ok(state == NM_STATE_CONNECTED_GLOBAL)
    }

    /// Poll NetworkManager and publish connectivity changes
    pub async fn watch(self, interval: Duration) -> (watch::Receiver<bool>, JoinHandle<()>) {
        let initial = self.is_network_available().await.unwrap_or(true);
        let monitor = Arc::new(self);

        spawn_poller(initial, interval, move || {
            let monitor = Arc::clone(&monitor);
            async move {
                match monitor.is_network_available().await {
                    Ok(available) => Some(available),
                    Err(e) => {
                        tracing::warn!("Connectivity query failed: {}", e);
                        None
                    }
                }
            }
        })
    }
}

/// Errors that can occur during network monitoring
#[derive(Debug, thiserror::Error)]
pub enum NetworkMonitorError {
    #[error("D-Bus connection failed: {0}")]
    DBusConnectionFailed(#[from] zbus::Error),

    #[error("NetworkManager not available")]
    NetworkManagerUnavailable,

    #[error("Failed to query network state: {0}")]
    QueryFailed(String),
}
