//! Shared test doubles for the engine and the tunnel host

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tunwarden_core::config::SupervisorPolicy;
use tunwarden_core::engine::{
    ConfigurationEvaluation, EngineEvent, EngineSink, PacketFlow, ProtocolEngine,
};
use tunwarden_core::error::{EngineError, HostError};
use tunwarden_core::host::TunnelHost;
use tunwarden_core::network::NetworkSettings;
use tunwarden_core::session::{SessionEvent, Supervisor, SupervisorHandle};
use tunwarden_core::types::{AuthMode, Password, SessionConfig};

/// What the engine was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ApplyConfiguration(String),
    ProvideCredentials(String),
    Connect(PacketFlow),
    Disconnect,
    Reconnect(Duration),
}

#[derive(Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    sink: Option<EngineSink>,
    reject_configuration: Option<EngineError>,
    autologin: bool,
    confirm_disconnect: bool,
}

/// Engine that records calls and lets the test play the engine's part
pub struct MockEngine {
    state: Arc<Mutex<EngineState>>,
}

/// Test-side handle onto a `MockEngine`
#[derive(Clone)]
pub struct EngineProbe {
    state: Arc<Mutex<EngineState>>,
}

impl MockEngine {
    /// Engine that reports Disconnected as soon as it is asked to disconnect
    pub fn new() -> (Self, EngineProbe) {
        let state = Arc::new(Mutex::new(EngineState {
            confirm_disconnect: true,
            ..Default::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            EngineProbe { state },
        )
    }
}

impl EngineProbe {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn sink(&self) -> EngineSink {
        self.state
            .lock()
            .unwrap()
            .sink
            .clone()
            .expect("engine was never connected")
    }

    pub fn set_autologin(&self, autologin: bool) {
        self.state.lock().unwrap().autologin = autologin;
    }

    pub fn reject_configuration(&self, error: EngineError) {
        self.state.lock().unwrap().reject_configuration = Some(error);
    }

    /// Leave Disconnected to the test instead of confirming disconnects
    pub fn hold_disconnect(&self) {
        self.state.lock().unwrap().confirm_disconnect = false;
    }

    pub fn emit(&self, event: EngineEvent) {
        self.sink().event(event);
    }

    pub fn log(&self, text: &str) {
        self.sink().log(text);
    }

    pub fn error(&self, error: EngineError) {
        self.sink().error(error);
    }
}

impl ProtocolEngine for MockEngine {
    fn apply_configuration(
        &mut self,
        config: &SessionConfig,
    ) -> Result<ConfigurationEvaluation, EngineError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(EngineCall::ApplyConfiguration(config.name.clone()));
        if let Some(error) = state.reject_configuration.clone() {
            return Err(error);
        }
        Ok(ConfigurationEvaluation {
            autologin: state.autologin,
            remote_host: Some("vpn.example.com".to_string()),
        })
    }

    fn provide_credentials(&mut self, username: &str, _password: &Password) -> Result<(), EngineError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(EngineCall::ProvideCredentials(username.to_string()));
        Ok(())
    }

    fn connect(&mut self, flow: PacketFlow, sink: EngineSink) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Connect(flow));
        state.sink = Some(sink);
    }

    fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(EngineCall::Disconnect);
        if state.confirm_disconnect {
            if let Some(sink) = &state.sink {
                sink.event(EngineEvent::Disconnected);
            }
        }
    }

    fn reconnect(&mut self, after: Duration) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(EngineCall::Reconnect(after));
    }

    fn connection_info(&self) -> Option<String> {
        Some("mock engine".to_string())
    }
}

#[derive(Default)]
struct HostState {
    applied: Vec<NetworkSettings>,
    reject: bool,
    cancelled: Vec<EngineError>,
}

pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

#[derive(Clone)]
pub struct HostProbe {
    state: Arc<Mutex<HostState>>,
}

pub const FLOW: PacketFlow = PacketFlow::new(42);

impl MockHost {
    pub fn new() -> (Self, HostProbe) {
        let state = Arc::new(Mutex::new(HostState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            HostProbe { state },
        )
    }
}

impl HostProbe {
    pub fn applied(&self) -> Vec<NetworkSettings> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn cancelled(&self) -> Vec<EngineError> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn reject_settings(&self) {
        self.state.lock().unwrap().reject = true;
    }
}

impl TunnelHost for MockHost {
    fn apply_network_settings(&mut self, settings: &NetworkSettings) -> Result<(), HostError> {
        let mut state = self.state.lock().unwrap();
        if state.reject {
            return Err(HostError::SettingsRejected {
                reason: "interface busy".to_string(),
            });
        }
        state.applied.push(settings.clone());
        Ok(())
    }

    fn packet_flow(&self) -> PacketFlow {
        FLOW
    }

    fn cancel_tunnel(&mut self, error: &EngineError) {
        self.state.lock().unwrap().cancelled.push(error.clone());
    }
}

pub fn test_profile() -> SessionConfig {
    SessionConfig::new("Frankfurt", b"client\nremote vpn.example.com 1194\n".to_vec())
}

pub fn credential_profile() -> SessionConfig {
    test_profile().with_auth(AuthMode::Credentials {
        username: "alice".to_string(),
        password: Password::from("hunter2"),
    })
}

/// A spawned supervisor with its test doubles
pub struct Harness {
    pub handle: SupervisorHandle,
    pub engine: EngineProbe,
    pub host: HostProbe,
    pub events: broadcast::Receiver<SessionEvent>,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub async fn start(online: bool) -> Self {
        Self::with_policy(SupervisorPolicy::default(), online).await
    }

    pub async fn with_policy(policy: SupervisorPolicy, online: bool) -> Self {
        let (engine, engine_probe) = MockEngine::new();
        let (host, host_probe) = MockHost::new();
        let (supervisor, handle) = Supervisor::new(policy, engine, host, online);
        let events = handle.subscribe();
        let task = supervisor.spawn();

        handle.select_profile(test_profile()).await.unwrap();

        Self {
            handle,
            engine: engine_probe,
            host: host_probe,
            events,
            task,
        }
    }

    /// Round-trip through the supervisor so everything sent before is handled
    pub async fn settle(&self) {
        self.handle.snapshot().await.unwrap();
    }

    /// Events published since the last drain
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn connect_and_establish(&mut self) {
        self.handle.connect().await.unwrap();
        self.engine.emit(EngineEvent::Connected);
        self.settle().await;
    }
}

pub fn statuses(events: &[SessionEvent]) -> Vec<tunwarden_core::session::ConnectionStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::StatusChanged(status) => Some(*status),
            _ => None,
        })
        .collect()
}

pub fn failures(events: &[SessionEvent]) -> Vec<tunwarden_core::session::FailureReason> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::ConnectionFailed(reason) => Some(reason.clone()),
            _ => None,
        })
        .collect()
}
