//! Reconnect coordination
//!
//! Two independent paths: the engine-level reconnect requested when the
//! transport's reachability changes, and the user-level retry that re-enters
//! the normal connect path after a short delay.

use crate::engine::Reachability;
use crate::error::SessionError;
use crate::session::timer::TimerSlot;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
pub struct ReconnectCoordinator {
    backoff: Duration,
    retry_delay: Duration,
    retry: TimerSlot,
}

impl ReconnectCoordinator {
    pub fn new(backoff: Duration, retry_delay: Duration) -> Self {
        Self {
            backoff,
            retry_delay,
            retry: TimerSlot::new("retry"),
        }
    }

    /// Backoff to hand the engine for a reachability change, if any
    ///
    /// Only a tracked session reacts, and only when the transport is usable.
    pub fn engine_reconnect_delay(
        &self,
        reachability: Reachability,
        tracking: bool,
    ) -> Option<Duration> {
        if tracking && reachability.is_reachable() {
            Some(self.backoff)
        } else {
            None
        }
    }

    /// Schedule a user retry
    ///
    /// Fails immediately when there is no profile or no network. Otherwise
    /// `message` is posted on `tx` once the retry delay has passed.
    pub fn request_retry<T, F>(
        &mut self,
        has_profile: bool,
        network_available: bool,
        tx: mpsc::UnboundedSender<T>,
        message: F,
    ) -> Result<(), SessionError>
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        if !has_profile {
            return Err(SessionError::NoProfileSelected);
        }
        if !network_available {
            return Err(SessionError::NoNetwork);
        }

        let generation = self.retry.arm(self.retry_delay, tx, message);
        debug!(generation, delay = ?self.retry_delay, "Retry scheduled");
        Ok(())
    }

    /// Accept an elapsed retry timer if it is still current
    pub fn take_retry(&mut self, generation: u64) -> bool {
        self.retry.take_fired(generation)
    }

    pub fn cancel_retry(&mut self) {
        self.retry.cancel();
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_armed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> ReconnectCoordinator {
        ReconnectCoordinator::new(Duration::from_secs(5), Duration::from_millis(500))
    }

    #[test]
    fn test_engine_reconnect_only_when_reachable_and_tracking() {
        let coordinator = coordinator();
        assert_eq!(
            coordinator.engine_reconnect_delay(Reachability::ReachableViaWifi, true),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            coordinator.engine_reconnect_delay(Reachability::NotReachable, true),
            None
        );
        assert_eq!(
            coordinator.engine_reconnect_delay(Reachability::ReachableViaWired, false),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rejections_arm_nothing() {
        let mut coordinator = coordinator();
        let (tx, _rx) = mpsc::unbounded_channel::<u64>();

        assert_eq!(
            coordinator.request_retry(false, true, tx.clone(), |g| g),
            Err(SessionError::NoProfileSelected)
        );
        assert_eq!(
            coordinator.request_retry(true, false, tx, |g| g),
            Err(SessionError::NoNetwork)
        );
        assert!(!coordinator.retry_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fires_after_delay() {
        let mut coordinator = coordinator();
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();

        coordinator.request_retry(true, true, tx, |g| g).unwrap();
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let generation = rx.recv().await.unwrap();
        assert!(coordinator.take_retry(generation));
    }
}
