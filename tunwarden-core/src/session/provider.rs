//! Tunnel provider
//!
//! Adapter between the host's start/stop contract and the protocol engine.
//! Every start and stop request is resolved exactly once, and at most one of
//! each is pending at any time. The provider does not own the status; it
//! reports which trigger an engine event amounts to and the supervisor
//! applies it.

use crate::engine::{
    EngineEvent, EngineSink, PacketFlow, ProtocolEngine, Reachability,
};
use crate::error::{EngineError, SessionError};
use crate::host::TunnelHost;
use crate::logstream::{LogLevel, LogStream, Subsystem};
use crate::network::{merge_defaults, NetworkSettings, SettingsDefaults};
use crate::session::state::Trigger;
use crate::types::{AuthMode, SessionConfig};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

const SUBSYSTEM: Subsystem = Subsystem::TunnelProvider;

/// Resolves when the start request completes
#[derive(Debug)]
pub struct StartTicket(oneshot::Receiver<Result<(), EngineError>>);

impl StartTicket {
    /// Wait for the tunnel to come up or the start to fail
    pub async fn wait(self) -> Result<(), EngineError> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::fatal("Tunnel start was abandoned")),
        }
    }
}

/// Resolves when the tunnel is down
#[derive(Debug)]
pub struct StopTicket(oneshot::Receiver<()>);

impl StopTicket {
    /// A ticket for a stop with nothing to stop
    pub fn completed() -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Self(rx)
    }

    pub async fn wait(self) {
        let _ = self.0.await;
    }
}

/// How an engine error was disposed of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Non-fatal; logged and the session continues
    Logged,
    /// Fatal while a start was pending; the start failed
    StartFailed,
    /// Fatal with no start pending; the host was told to cancel the tunnel
    SessionFailed,
}

impl ErrorDisposition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ErrorDisposition::Logged)
    }
}

pub struct TunnelProvider<E, H> {
    engine: E,
    host: H,
    sink: EngineSink,
    defaults: SettingsDefaults,
    session: u64,
    active: bool,
    tracking_reachability: bool,
    dns_override: Vec<String>,
    applied: Option<NetworkSettings>,
    pending_start: Option<oneshot::Sender<Result<(), EngineError>>>,
    pending_stop: Option<oneshot::Sender<()>>,
}

impl<E: ProtocolEngine, H: TunnelHost> TunnelProvider<E, H> {
    /// `sink` is the template from which each session's engine sink is cut
    pub fn new(engine: E, host: H, sink: EngineSink, defaults: SettingsDefaults) -> Self {
        Self {
            engine,
            host,
            sink,
            defaults,
            session: 0,
            active: false,
            tracking_reachability: false,
            dns_override: Vec::new(),
            applied: None,
            pending_start: None,
            pending_stop: None,
        }
    }

    /// Id of the current (or last) engine session
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_tracking_reachability(&self) -> bool {
        self.tracking_reachability
    }

    pub fn has_pending_start(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn has_pending_stop(&self) -> bool {
        self.pending_stop.is_some()
    }

    /// Settings most recently accepted by the host
    pub fn applied_settings(&self) -> Option<&NetworkSettings> {
        self.applied.as_ref()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Start a session
    ///
    /// Rejections are synchronous and leave nothing running. Once accepted,
    /// the returned ticket resolves exactly once.
    pub fn start(
        &mut self,
        config: &SessionConfig,
        log: &mut LogStream,
    ) -> Result<StartTicket, SessionError> {
        if self.pending_start.is_some() {
            return Err(SessionError::StartInProgress);
        }
        if self.active {
            return Err(SessionError::AlreadyActive {
                status: "tunnel running".to_string(),
            });
        }
        if config.is_empty() {
            log.append(LogLevel::Error, SUBSYSTEM, "Tunnel configuration is missing");
            return Err(SessionError::ConfigMissing);
        }

        log.append(
            LogLevel::Info,
            SUBSYSTEM,
            format!("Starting tunnel for profile {}", config.name),
        );

        let evaluation = self.engine.apply_configuration(config).map_err(|e| {
            log.append(
                LogLevel::Error,
                SUBSYSTEM,
                format!("Configuration rejected: {}", e),
            );
            SessionError::EngineRejected { reason: e.message }
        })?;

        if let Some(remote) = &evaluation.remote_host {
            log.append(LogLevel::Info, SUBSYSTEM, format!("Remote host: {}", remote));
        }

        if !evaluation.autologin {
            if let AuthMode::Credentials { username, password } = &config.auth {
                self.engine
                    .provide_credentials(username, password)
                    .map_err(|e| {
                        log.append(
                            LogLevel::Error,
                            SUBSYSTEM,
                            format!("Credentials rejected: {}", e),
                        );
                        SessionError::EngineRejected { reason: e.message }
                    })?;
            }
        }

        self.session += 1;
        self.active = true;
        self.applied = None;
        self.dns_override = config.dns_override.clone();
        self.tracking_reachability = true;
        debug!(session = self.session, "Reachability tracking started");

        let (tx, rx) = oneshot::channel();
        self.pending_start = Some(tx);

        let flow = self.host.packet_flow();
        self.engine.connect(flow, self.sink.for_session(self.session));

        Ok(StartTicket(rx))
    }

    /// Stop the session
    ///
    /// With nothing running this succeeds immediately. A pending start is
    /// resolved as cancelled.
    pub fn stop(&mut self, log: &mut LogStream) -> Result<StopTicket, SessionError> {
        if self.pending_stop.is_some() {
            return Err(SessionError::StopInProgress);
        }
        if !self.active {
            return Ok(StopTicket::completed());
        }

        log.append(LogLevel::Info, SUBSYSTEM, "Stopping tunnel");
        self.tracking_reachability = false;

        if let Some(start) = self.pending_start.take() {
            let _ = start.send(Err(EngineError::fatal("Tunnel start was cancelled")));
        }

        let (tx, rx) = oneshot::channel();
        self.pending_stop = Some(tx);
        self.engine.disconnect();

        Ok(StopTicket(rx))
    }

    /// Merge defaults into engine-proposed settings and hand them to the host
    ///
    /// The reply carries the packet flow on success and `None` on failure.
    pub fn apply_network_settings(
        &mut self,
        settings: NetworkSettings,
        reply: oneshot::Sender<Option<PacketFlow>>,
        log: &mut LogStream,
    ) {
        let merged = merge_defaults(settings, &self.dns_override, &self.defaults);
        log_settings(&merged, log);

        match self.host.apply_network_settings(&merged) {
            Ok(()) => {
                self.applied = Some(merged);
                let _ = reply.send(Some(self.host.packet_flow()));
            }
            Err(e) => {
                log.append(
                    LogLevel::Error,
                    SUBSYSTEM,
                    format!("Failed to set network settings: {}", e),
                );
                let _ = reply.send(None);
            }
        }
    }

    /// Map an engine lifecycle event to a state machine trigger
    pub fn handle_engine_event(&mut self, event: EngineEvent, log: &mut LogStream) -> Option<Trigger> {
        match event {
            EngineEvent::Connected => {
                log.append(LogLevel::Info, SUBSYSTEM, "Tunnel connected");
                if let Some(start) = self.pending_start.take() {
                    let _ = start.send(Ok(()));
                }
                Some(Trigger::EngineConnected)
            }
            EngineEvent::Reconnecting => {
                log.append(LogLevel::Info, SUBSYSTEM, "Tunnel reconnecting");
                Some(Trigger::EngineReconnecting)
            }
            EngineEvent::Disconnected => {
                log.append(LogLevel::Info, SUBSYSTEM, "Tunnel disconnected");
                self.finish_session();
                if let Some(start) = self.pending_start.take() {
                    let _ = start.send(Err(EngineError::fatal(
                        "Tunnel went down before it was established",
                    )));
                }
                Some(Trigger::EngineDisconnected)
            }
            EngineEvent::Other(name) => {
                log.append(LogLevel::Debug, SUBSYSTEM, format!("Engine event: {}", name));
                None
            }
        }
    }

    /// Log an engine error and terminate the session if it is fatal
    pub fn handle_engine_error(&mut self, error: EngineError, log: &mut LogStream) -> ErrorDisposition {
        log.append(LogLevel::Error, SUBSYSTEM, error.message.clone());

        if !error.fatal {
            return ErrorDisposition::Logged;
        }

        if let Some(info) = self.engine.connection_info() {
            log.append(LogLevel::Info, SUBSYSTEM, format!("Connection info: {}", info));
        }

        self.finish_session();

        match self.pending_start.take() {
            Some(start) => {
                let _ = start.send(Err(error));
                ErrorDisposition::StartFailed
            }
            None => {
                self.host.cancel_tunnel(&error);
                ErrorDisposition::SessionFailed
            }
        }
    }

    /// Record a free-text engine line at its classified level
    pub fn handle_log_line(&mut self, text: String, log: &mut LogStream) {
        log.append(LogLevel::classify(&text), SUBSYSTEM, text);
    }

    /// Echo an app message back; non-UTF-8 payloads get no reply
    pub fn handle_app_message(&mut self, data: Vec<u8>, log: &mut LogStream) -> Option<Vec<u8>> {
        let text = match std::str::from_utf8(&data) {
            Ok(text) => text,
            Err(_) => {
                log.append(LogLevel::Warning, SUBSYSTEM, "Dropping non-UTF-8 app message");
                return None;
            }
        };
        log.append(LogLevel::Info, SUBSYSTEM, format!("Got message from app: {}", text));
        Some(data)
    }

    /// Ask the engine to re-establish the tunnel after `after`
    ///
    /// Returns false when no session is tracking reachability.
    pub fn reconnect(&mut self, after: Duration, log: &mut LogStream) -> bool {
        if !self.tracking_reachability {
            return false;
        }
        log.append(
            LogLevel::Info,
            SUBSYSTEM,
            format!("Reconnecting in {}s", after.as_secs()),
        );
        self.engine.reconnect(after);
        true
    }

    /// Transport reachability changed; only logged here
    pub fn note_reachability(&self, reachability: Reachability) {
        debug!(?reachability, tracking = self.tracking_reachability, "Reachability changed");
    }

    fn finish_session(&mut self) {
        if self.tracking_reachability {
            debug!(session = self.session, "Reachability tracking stopped");
        }
        self.tracking_reachability = false;
        self.active = false;
        if let Some(stop) = self.pending_stop.take() {
            let _ = stop.send(());
        }
    }
}

fn log_settings(settings: &NetworkSettings, log: &mut LogStream) {
    if let Some(remote) = &settings.remote_address {
        log.append(LogLevel::Info, SUBSYSTEM, format!("Remote address: {}", remote));
    }
    if let Some(ipv4) = &settings.ipv4 {
        let routes: Vec<String> = ipv4.included_routes.iter().map(|r| r.to_string()).collect();
        log.append(
            LogLevel::Info,
            SUBSYSTEM,
            format!("IPv4 routes: {}", routes.join(", ")),
        );
        if !ipv4.excluded_routes.is_empty() {
            let excluded: Vec<String> =
                ipv4.excluded_routes.iter().map(|r| r.to_string()).collect();
            log.append(
                LogLevel::Info,
                SUBSYSTEM,
                format!("IPv4 excluded routes: {}", excluded.join(", ")),
            );
        }
    }
    if let Some(dns) = &settings.dns {
        log.append(
            LogLevel::Info,
            SUBSYSTEM,
            format!("DNS servers: {}", dns.servers.join(", ")),
        );
    }
}
