//! Network guardian
//!
//! Tracks host connectivity and decides what a change means for the session.
//! It never touches the session itself; the supervisor carries out the
//! returned decision.

use crate::session::events::{NO_INTERNET_BEFORE_CONNECT, NO_INTERNET_LOST};
use crate::session::state::ConnectionStatus;
use tracing::{debug, info};

/// What to do about a connectivity change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardianDecision {
    /// Force-fail the live session with `NetworkLost`
    pub force_failure: bool,

    /// Raise a no-internet alert with this text
    pub alert: Option<&'static str>,

    /// Dismiss the outstanding no-internet alert
    pub dismiss: bool,
}

impl GuardianDecision {
    pub fn is_noop(&self) -> bool {
        !self.force_failure && self.alert.is_none() && !self.dismiss
    }
}

#[derive(Debug, Clone)]
pub struct NetworkGuardian {
    connected: bool,
    alert_outstanding: bool,
}

impl NetworkGuardian {
    pub fn new(connected: bool) -> Self {
        Self {
            connected,
            alert_outstanding: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn alert_outstanding(&self) -> bool {
        self.alert_outstanding
    }

    /// Feed a connectivity sample
    ///
    /// Only transitions matter. Losing the network while connected forces a
    /// failure; losing it in any state raises one alert. Getting it back
    /// dismisses that alert and does not reconnect.
    pub fn observe(&mut self, connected: bool, status: ConnectionStatus) -> GuardianDecision {
        if connected == self.connected {
            return GuardianDecision::default();
        }
        self.connected = connected;

        if connected {
            info!("Network connectivity restored");
            let dismiss = std::mem::take(&mut self.alert_outstanding);
            return GuardianDecision {
                dismiss,
                ..Default::default()
            };
        }

        info!(%status, "Network connectivity lost");
        GuardianDecision {
            force_failure: status == ConnectionStatus::Connected,
            alert: self.raise(NO_INTERNET_LOST),
            dismiss: false,
        }
    }

    /// Check whether a connect may proceed
    ///
    /// While offline the connect is vetoed and the pre-connect alert is
    /// returned, unless an alert is already showing.
    pub fn veto_connect(&mut self) -> Result<(), Option<&'static str>> {
        if self.connected {
            return Ok(());
        }
        debug!("Connect vetoed: no network");
        Err(self.raise(NO_INTERNET_BEFORE_CONNECT))
    }

    fn raise(&mut self, message: &'static str) -> Option<&'static str> {
        if self.alert_outstanding {
            return None;
        }
        self.alert_outstanding = true;
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_while_connected_forces_failure() {
        let mut guardian = NetworkGuardian::new(true);
        let decision = guardian.observe(false, ConnectionStatus::Connected);
        assert!(decision.force_failure);
        assert_eq!(decision.alert, Some(NO_INTERNET_LOST));
    }

    #[test]
    fn test_loss_while_idle_only_alerts() {
        let mut guardian = NetworkGuardian::new(true);
        let decision = guardian.observe(false, ConnectionStatus::Disconnected);
        assert!(!decision.force_failure);
        assert_eq!(decision.alert, Some(NO_INTERNET_LOST));
    }

    #[test]
    fn test_repeated_samples_are_ignored() {
        let mut guardian = NetworkGuardian::new(true);
        guardian.observe(false, ConnectionStatus::Connected);
        assert!(guardian.observe(false, ConnectionStatus::Disconnected).is_noop());
        assert!(guardian.alert_outstanding());
    }

    #[test]
    fn test_restore_dismisses_once() {
        let mut guardian = NetworkGuardian::new(false);
        assert_eq!(guardian.veto_connect(), Err(Some(NO_INTERNET_BEFORE_CONNECT)));
        assert_eq!(guardian.veto_connect(), Err(None));

        let decision = guardian.observe(true, ConnectionStatus::Disconnected);
        assert!(decision.dismiss);
        assert!(!guardian.alert_outstanding());
        assert_eq!(guardian.veto_connect(), Ok(()));
    }
}
