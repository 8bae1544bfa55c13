//! Session supervisor
//!
//! A single task owns the status, the session log, the timers and the tunnel
//! provider. Everything else talks to it through a `SupervisorHandle`, and
//! engine callbacks, elapsed timers and connectivity samples arrive on the
//! same command queue, so no two of them are ever handled at once.

use crate::config::SupervisorPolicy;
use crate::engine::{EngineMessage, EngineSink, ProtocolEngine, Reachability};
use crate::error::SessionError;
use crate::host::TunnelHost;
use crate::logstream::{LogLevel, LogStream, LogView, Subsystem};
use crate::session::detector::{FailureDetector, PatternDetector};
use crate::session::events::{FailureReason, SessionEvent};
use crate::session::guardian::NetworkGuardian;
use crate::session::provider::{StartTicket, StopTicket, TunnelProvider};
use crate::session::reconnect::ReconnectCoordinator;
use crate::session::state::{ConnectionStatus, StateMachine, Trigger};
use crate::session::timer::TimerSlot;
use crate::types::SessionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

const SUBSYSTEM: Subsystem = Subsystem::Supervisor;
const EVENT_CAPACITY: usize = 64;

/// Commands handled by the supervisor task
#[derive(Debug)]
pub(crate) enum Command {
    SelectProfile {
        config: Box<SessionConfig>,
        reply_tx: oneshot::Sender<()>,
    },
    ClearProfile {
        reply_tx: oneshot::Sender<()>,
    },
    Connect {
        reply_tx: oneshot::Sender<Result<StartTicket, SessionError>>,
    },
    Disconnect {
        reply_tx: oneshot::Sender<Result<StopTicket, SessionError>>,
    },
    Retry {
        reply_tx: oneshot::Sender<Result<(), SessionError>>,
    },
    Connectivity(bool),
    Reachability(Reachability),
    AppMessage {
        data: Vec<u8>,
        reply_tx: oneshot::Sender<Option<Vec<u8>>>,
    },
    Snapshot {
        reply_tx: oneshot::Sender<SessionSnapshot>,
    },
    Engine {
        session: u64,
        message: EngineMessage,
    },
    DeadlineElapsed(u64),
    RetryElapsed(u64),
    Shutdown {
        reply_tx: oneshot::Sender<()>,
    },
}

/// Consistent view of the session for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_failure: Option<FailureReason>,
    pub profile_name: Option<String>,
    pub network_available: bool,
    pub alert_outstanding: bool,
    pub deadline_armed: bool,
    pub retry_pending: bool,
}

/// Cloneable client of a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<SessionEvent>,
    logs: LogView,
}

impl SupervisorHandle {
    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(build(reply_tx))?;
        reply_rx.await.map_err(|_| SessionError::SupervisorGone)
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::SupervisorGone)
    }

    /// Make `config` the profile used by subsequent connects
    pub async fn select_profile(&self, config: SessionConfig) -> Result<(), SessionError> {
        self.request(|reply_tx| Command::SelectProfile {
            config: Box::new(config),
            reply_tx,
        })
        .await
    }

    pub async fn clear_profile(&self) -> Result<(), SessionError> {
        self.request(|reply_tx| Command::ClearProfile { reply_tx }).await
    }

    /// Start a connect attempt with the selected profile
    ///
    /// Returns once the attempt is accepted; the ticket resolves when the
    /// tunnel is up or the start fails.
    pub async fn connect(&self) -> Result<StartTicket, SessionError> {
        self.request(|reply_tx| Command::Connect { reply_tx }).await?
    }

    /// Stop the session; the ticket resolves once the tunnel is down
    pub async fn disconnect(&self) -> Result<StopTicket, SessionError> {
        self.request(|reply_tx| Command::Disconnect { reply_tx }).await?
    }

    /// Connect again after the retry delay
    pub async fn retry(&self) -> Result<(), SessionError> {
        self.request(|reply_tx| Command::Retry { reply_tx }).await?
    }

    /// Feed a host connectivity sample
    pub fn set_connectivity(&self, connected: bool) -> Result<(), SessionError> {
        self.send(Command::Connectivity(connected))
    }

    /// Feed a transport reachability change
    pub fn reachability_changed(&self, reachability: Reachability) -> Result<(), SessionError> {
        self.send(Command::Reachability(reachability))
    }

    /// Send an app message to the tunnel provider and wait for its reply
    pub async fn app_message(&self, data: Vec<u8>) -> Result<Option<Vec<u8>>, SessionError> {
        self.request(|reply_tx| Command::AppMessage { data, reply_tx })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply_tx| Command::Snapshot { reply_tx }).await
    }

    /// Current status, readable from any task
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Register for upstream events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn logs(&self) -> &LogView {
        &self.logs
    }

    /// Forward every value of a connectivity source until either side closes
    pub fn follow_connectivity(&self, mut source: watch::Receiver<bool>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            loop {
                let connected = *source.borrow_and_update();
                if handle.set_connectivity(connected).is_err() {
                    break;
                }
                if source.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Stop any live session and end the supervisor task
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|reply_tx| Command::Shutdown { reply_tx }).await
    }
}

pub struct Supervisor<E, H> {
    policy: SupervisorPolicy,
    machine: StateMachine,
    log: LogStream,
    detector: Box<dyn FailureDetector>,
    detector_cursor: usize,
    attempt_log_start: usize,
    provider: TunnelProvider<E, H>,
    guardian: NetworkGuardian,
    reconnect: ReconnectCoordinator,
    deadline: TimerSlot,
    profile: Option<SessionConfig>,
    attempt: u64,
    failed_attempt: Option<u64>,
    connected_since: Option<DateTime<Utc>>,
    last_failure: Option<FailureReason>,
    events: broadcast::Sender<SessionEvent>,
    commands: mpsc::UnboundedSender<Command>,
    inbox: mpsc::UnboundedReceiver<Command>,
}

impl<E, H> Supervisor<E, H>
where
    E: ProtocolEngine + 'static,
    H: TunnelHost + 'static,
{
    /// Build a supervisor and its handle
    ///
    /// Nothing runs until `run` (or `spawn`) is called.
    pub fn new(
        policy: SupervisorPolicy,
        engine: E,
        host: H,
        network_available: bool,
    ) -> (Self, SupervisorHandle) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine_tx = commands.clone();
        let sink = EngineSink::new(move |session, message| {
            if engine_tx.send(Command::Engine { session, message }).is_err() {
                trace!(session, "Supervisor gone, dropping engine message");
            }
        });

        let provider = TunnelProvider::new(engine, host, sink, policy.settings_defaults());
        let machine = StateMachine::new();
        let log = LogStream::new();

        let handle = SupervisorHandle {
            commands: commands.clone(),
            status: machine.subscribe(),
            events: events.clone(),
            logs: log.view(),
        };

        let supervisor = Self {
            detector: Box::new(PatternDetector::new(
                policy.detector_window,
                policy.detector_threshold,
            )),
            reconnect: ReconnectCoordinator::new(
                policy.reachability_backoff(),
                policy.retry_delay(),
            ),
            policy,
            machine,
            log,
            detector_cursor: 0,
            attempt_log_start: 0,
            provider,
            guardian: NetworkGuardian::new(network_available),
            deadline: TimerSlot::new("connect-deadline"),
            profile: None,
            attempt: 0,
            failed_attempt: None,
            connected_since: None,
            last_failure: None,
            events,
            commands,
            inbox,
        };

        (supervisor, handle)
    }

    /// Replace the log-pattern failure detector
    pub fn with_detector(mut self, detector: Box<dyn FailureDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands until shut down
    pub async fn run(mut self) {
        self.transition(Trigger::ConfigurationLoaded);
        info!("Session supervisor started");

        while let Some(command) = self.inbox.recv().await {
            let keep_running = self.dispatch(command);
            self.evaluate_detector();
            if !keep_running {
                break;
            }
        }

        info!("Session supervisor stopped");
    }

    fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::SelectProfile { config, reply_tx } => {
                self.log.append(
                    LogLevel::Info,
                    SUBSYSTEM,
                    format!("Selected profile {}", config.name),
                );
                self.profile = Some(*config);
                let _ = reply_tx.send(());
            }
            Command::ClearProfile { reply_tx } => {
                self.profile = None;
                let _ = reply_tx.send(());
            }
            Command::Connect { reply_tx } => {
                let _ = reply_tx.send(self.connect());
            }
            Command::Disconnect { reply_tx } => {
                let _ = reply_tx.send(self.disconnect());
            }
            Command::Retry { reply_tx } => {
                let _ = reply_tx.send(self.retry());
            }
            Command::Connectivity(connected) => self.connectivity_changed(connected),
            Command::Reachability(reachability) => self.reachability_changed(reachability),
            Command::AppMessage { data, reply_tx } => {
                let reply = self.provider.handle_app_message(data, &mut self.log);
                let _ = reply_tx.send(reply);
            }
            Command::Snapshot { reply_tx } => {
                let _ = reply_tx.send(self.snapshot());
            }
            Command::Engine { session, message } => self.engine_message(session, message),
            Command::DeadlineElapsed(generation) => self.deadline_elapsed(generation),
            Command::RetryElapsed(generation) => self.retry_elapsed(generation),
            Command::Shutdown { reply_tx } => {
                self.teardown();
                let _ = reply_tx.send(());
                return false;
            }
        }
        true
    }

    fn connect(&mut self) -> Result<StartTicket, SessionError> {
        let config = self.profile.clone().ok_or(SessionError::NoProfileSelected)?;

        if let Err(alert) = self.guardian.veto_connect() {
            self.log.append(
                LogLevel::Warning,
                SUBSYSTEM,
                "Connect refused: no network connection",
            );
            if let Some(message) = alert {
                self.emit(SessionEvent::NoInternetAlert(message.to_string()));
            }
            return Err(SessionError::NoNetwork);
        }

        let status = self.machine.status();
        if status.is_attempting() {
            return Err(SessionError::StartInProgress);
        }
        if status != ConnectionStatus::Disconnected {
            return Err(SessionError::AlreadyActive {
                status: status.to_string(),
            });
        }

        self.attempt_log_start = self.log.len();
        let ticket = self.provider.start(&config, &mut self.log)?;

        self.attempt += 1;
        self.reconnect.cancel_retry();
        self.transition(Trigger::StartAccepted);
        self.arm_deadline();
        info!(attempt = self.attempt, profile = %config.name, "Connect attempt started");

        Ok(ticket)
    }

    fn disconnect(&mut self) -> Result<StopTicket, SessionError> {
        self.reconnect.cancel_retry();
        match self.machine.status() {
            ConnectionStatus::Invalid | ConnectionStatus::Disconnected => {
                Ok(StopTicket::completed())
            }
            _ => {
                self.log
                    .append(LogLevel::Info, SUBSYSTEM, "Disconnect requested");
                self.stop_session()
            }
        }
    }

    fn retry(&mut self) -> Result<(), SessionError> {
        let status = self.machine.status();
        if status.is_active() {
            return Err(SessionError::AlreadyActive {
                status: status.to_string(),
            });
        }

        let result = self.reconnect.request_retry(
            self.profile.is_some(),
            self.guardian.is_connected(),
            self.commands.clone(),
            Command::RetryElapsed,
        );

        match &result {
            Ok(()) => self
                .log
                .append(LogLevel::Info, SUBSYSTEM, "Retrying connection"),
            Err(SessionError::NoNetwork) => {
                if let Err(Some(message)) = self.guardian.veto_connect() {
                    self.emit(SessionEvent::NoInternetAlert(message.to_string()));
                }
            }
            Err(_) => {}
        }
        result
    }

    fn retry_elapsed(&mut self, generation: u64) {
        if !self.reconnect.take_retry(generation) {
            trace!(generation, "Ignoring stale retry timer");
            return;
        }
        if let Err(e) = self.connect() {
            self.log
                .append(LogLevel::Warning, SUBSYSTEM, format!("Retry failed: {}", e));
        }
    }

    fn deadline_elapsed(&mut self, generation: u64) {
        if !self.deadline.take_fired(generation) {
            trace!(generation, "Ignoring stale deadline timer");
            return;
        }
        if self.machine.status().is_attempting() {
            self.force_failure(FailureReason::Timeout);
        }
    }

    fn connectivity_changed(&mut self, connected: bool) {
        let decision = self.guardian.observe(connected, self.machine.status());
        if decision.is_noop() {
            return;
        }

        if connected {
            self.log
                .append(LogLevel::Info, SUBSYSTEM, "Network connection restored");
        } else {
            self.log
                .append(LogLevel::Warning, SUBSYSTEM, "Network connection lost");
        }

        if decision.force_failure {
            self.force_failure(FailureReason::NetworkLost);
        }
        if let Some(message) = decision.alert {
            self.emit(SessionEvent::NoInternetAlert(message.to_string()));
        }
        if decision.dismiss {
            self.emit(SessionEvent::NoInternetDismissed);
        }
    }

    fn reachability_changed(&mut self, reachability: Reachability) {
        self.provider.note_reachability(reachability);
        let tracking = self.provider.is_tracking_reachability();
        if let Some(after) = self.reconnect.engine_reconnect_delay(reachability, tracking) {
            self.provider.reconnect(after, &mut self.log);
        }
    }

    fn engine_message(&mut self, session: u64, message: EngineMessage) {
        if session != self.provider.session() {
            debug!(
                session,
                current = self.provider.session(),
                "Dropping message from a previous engine session"
            );
            if let EngineMessage::ConfigureTunnel { reply, .. } = message {
                let _ = reply.send(None);
            }
            return;
        }

        match message {
            EngineMessage::Event(event) => {
                if let Some(trigger) = self.provider.handle_engine_event(event, &mut self.log) {
                    self.transition(trigger);
                }
            }
            EngineMessage::Error(error) => {
                let disposition = self.provider.handle_engine_error(error, &mut self.log);
                if disposition.is_terminal() {
                    // Classify the error text while the attempt is still live.
                    self.evaluate_detector();
                    if self.machine.status() != ConnectionStatus::Disconnected {
                        self.transition(Trigger::Terminated);
                    }
                }
            }
            EngineMessage::Log(text) => self.provider.handle_log_line(text, &mut self.log),
            EngineMessage::ConfigureTunnel { settings, reply } => {
                self.provider
                    .apply_network_settings(settings, reply, &mut self.log)
            }
        }
    }

    /// Run the detector once for every entry appended since the last run
    ///
    /// Only entries of the current attempt are considered, and only while an
    /// attempt is in flight.
    fn evaluate_detector(&mut self) {
        while self.detector_cursor < self.log.len() {
            self.detector_cursor += 1;
            if !self.machine.status().is_attempting() {
                continue;
            }

            let end = self.detector_cursor;
            let start = end
                .saturating_sub(self.detector.window())
                .max(self.attempt_log_start);
            let window = self.log.range(start, end);

            if let Some(reason) = self.detector.evaluate(&window) {
                self.force_failure(reason);
            }
        }
    }

    /// End the current attempt or session with `reason`
    ///
    /// Effective once per attempt; later calls for the same attempt do
    /// nothing.
    fn force_failure(&mut self, reason: FailureReason) {
        if self.failed_attempt == Some(self.attempt) {
            debug!(attempt = self.attempt, %reason, "Attempt already failed");
            return;
        }
        self.failed_attempt = Some(self.attempt);

        self.deadline.cancel();
        self.reconnect.cancel_retry();

        if let Err(e) = self.stop_session() {
            debug!("Stop during forced failure: {}", e);
        }

        self.connected_since = None;
        self.last_failure = Some(reason.clone());
        self.log.append(
            LogLevel::Error,
            SUBSYSTEM,
            format!("Connection failed: {}", reason.message()),
        );
        self.emit(SessionEvent::ConnectionFailed(reason));
    }

    fn stop_session(&mut self) -> Result<StopTicket, SessionError> {
        let ticket = self.provider.stop(&mut self.log)?;

        // A session the engine already ended skips Disconnecting.
        if self.provider.is_active()
            && matches!(
                self.machine.status(),
                ConnectionStatus::Connecting
                    | ConnectionStatus::Connected
                    | ConnectionStatus::Reasserting
            )
        {
            self.transition(Trigger::StopRequested);
        }

        // Nothing is left to report the tunnel down.
        if !self.provider.is_active() && self.machine.status().is_active() {
            self.transition(Trigger::Terminated);
        }

        Ok(ticket)
    }

    fn arm_deadline(&mut self) {
        let after = self.policy.connect_timeout();
        let generation = self
            .deadline
            .arm(after, self.commands.clone(), Command::DeadlineElapsed);
        debug!(generation, ?after, "Connect deadline armed");
    }

    fn transition(&mut self, trigger: Trigger) -> Option<ConnectionStatus> {
        let to = self.machine.apply(trigger).ok()?;

        match to {
            ConnectionStatus::Connected => {
                self.deadline.cancel();
                self.connected_since = Some(Utc::now());
            }
            ConnectionStatus::Disconnected => {
                self.deadline.cancel();
                self.connected_since = None;
            }
            ConnectionStatus::Disconnecting | ConnectionStatus::Invalid => self.deadline.cancel(),
            ConnectionStatus::Connecting | ConnectionStatus::Reasserting => {}
        }

        self.emit(SessionEvent::StatusChanged(to));
        Some(to)
    }

    fn emit(&self, event: SessionEvent) {
        trace!(?event, "Publishing session event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.machine.status(),
            connected_since: self.connected_since,
            last_failure: self.last_failure.clone(),
            profile_name: self.profile.as_ref().map(|p| p.name.clone()),
            network_available: self.guardian.is_connected(),
            alert_outstanding: self.guardian.alert_outstanding(),
            deadline_armed: self.deadline.is_armed(),
            retry_pending: self.reconnect.retry_pending(),
        }
    }

    fn teardown(&mut self) {
        self.deadline.cancel();
        self.reconnect.cancel_retry();
        if self.provider.is_active() {
            if let Err(e) = self.stop_session() {
                debug!("Stop during shutdown: {}", e);
            }
        }
    }
}
