//! Host connectivity via an HTTP endpoint
//!
//! For hosts without NetworkManager: the network counts as available while
//! the endpoint answers at all.

use crate::network::spawn_poller;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Outcome of a single probe request
#[derive(Debug, Clone)]
pub struct ProbeResult {
    success: bool,
    duration: Duration,
    error: Option<String>,
}

impl ProbeResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            error: None,
        }
    }

    pub fn failure(duration: Duration, error: String) -> Self {
        Self {
            success: false,
            duration,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client creation failed: {0}")]
    ClientCreationFailed(#[from] reqwest::Error),
}

#[derive(Debug)]
pub struct ConnectivityProbe {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl ConnectivityProbe {
    /// Create a probe for an http(s) endpoint
    #[tracing::instrument(skip(timeout), fields(endpoint = %endpoint, timeout_ms = timeout.as_millis()))]
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ProbeError> {
        let url = Url::parse(&endpoint)
            .map_err(|e| ProbeError::InvalidUrl(format!("Failed to parse URL: {}", e)))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(ProbeError::InvalidUrl(format!(
                    "Only HTTP/HTTPS schemes are supported, got: {}",
                    scheme
                )));
            }
        }

        let client = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// GET the endpoint; 2xx and 3xx count as success
    #[tracing::instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn check(&self) -> ProbeResult {
        let start = Instant::now();

        match self.client.get(&self.endpoint).send().await {
            Ok(response) => {
                let duration = start.elapsed();
                let status = response.status();

                if status.is_success() || status.is_redirection() {
                    debug!(status = %status, duration_ms = duration.as_millis(), "Probe succeeded");
                    ProbeResult::success(duration)
                } else {
                    warn!(status = %status, duration_ms = duration.as_millis(), "Probe got error status");
                    ProbeResult::failure(duration, format!("Unhealthy status code: {}", status))
                }
            }
            Err(e) => {
                let duration = start.elapsed();
                let error = if e.is_timeout() {
                    format!("Request timeout after {:?}", self.timeout)
                } else if e.is_connect() {
                    "Connection refused or unreachable".to_string()
                } else {
                    format!("Request failed: {}", e)
                };
                warn!(error = %error, duration_ms = duration.as_millis(), "Probe failed");
                ProbeResult::failure(duration, error)
            }
        }
    }

    /// Whether the endpoint answered at all
    ///
    /// Any HTTP response means the network is up; only timeouts and
    /// connection failures mean it is not.
    pub async fn is_reachable(&self) -> bool {
        match self.client.get(&self.endpoint).send().await {
            Ok(_) => true,
            Err(e) => !(e.is_timeout() || e.is_connect()),
        }
    }

    /// Probe periodically and publish reachability changes
    pub fn watch(self, interval: Duration) -> (watch::Receiver<bool>, JoinHandle<()>) {
        let probe = Arc::new(self);
        spawn_poller(true, interval, move || {
            let probe = Arc::clone(&probe);
            async move { Some(probe.is_reachable().await) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        let result = ConnectivityProbe::new("ftp://example.com/".to_string(), Duration::from_secs(5));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Only HTTP/HTTPS schemes"));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let result = ConnectivityProbe::new("not a url".to_string(), Duration::from_secs(5));
        assert!(result.unwrap_err().to_string().contains("parse URL"));
    }

    #[test]
    fn test_result_accessors() {
        let result = ProbeResult::failure(Duration::from_millis(456), "timeout".to_string());
        assert!(!result.is_success());
        assert_eq!(result.duration(), Duration::from_millis(456));
        assert_eq!(result.error(), Some("timeout"));
    }
}
