//! Network settings and host connectivity sources
//!
//! Connectivity sources publish a plain `bool` on a watch channel; the
//! session supervisor follows it through `SupervisorHandle::follow_connectivity`.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub mod monitor;
pub mod probe;
pub mod settings;

pub use monitor::{NetworkMonitor, NetworkMonitorError};
pub use probe::{ConnectivityProbe, ProbeError, ProbeResult};
pub use settings::{merge_defaults, DnsSettings, IpSettings, NetworkSettings, Route, SettingsDefaults};

/// Poll `check` every `interval` and publish changes
///
/// A `None` sample means the check could not be made; the last published
/// value is kept. Polling stops once every receiver is gone.
pub fn spawn_poller<F, Fut>(
    initial: bool,
    interval: Duration,
    mut check: F,
) -> (watch::Receiver<bool>, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Option<bool>> + Send,
{
    let (tx, rx) = watch::channel(initial);

    let task = tokio::spawn(async move {
        loop {
            if let Some(connected) = check().await {
                tx.send_if_modified(|current| {
                    if *current == connected {
                        false
                    } else {
                        tracing::debug!(connected, "Connectivity changed");
                        *current = connected;
                        true
                    }
                });
            }

            if tx.is_closed() {
                break;
            }
            tokio::time::sleep(interval).await;
        }
    });

    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_poller_publishes_changes_only() {
        let online = Arc::new(AtomicBool::new(true));
        let source = Arc::clone(&online);
        let (mut rx, _task) = spawn_poller(true, Duration::from_secs(5), move || {
            let online = source.load(Ordering::SeqCst);
            async move { Some(online) }
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!rx.has_changed().unwrap());

        online.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_samples_keep_last_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let (rx, _task) = spawn_poller(true, Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { None }
        });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(calls.load(Ordering::SeqCst) >= 2);
        assert!(*rx.borrow());
    }
}
