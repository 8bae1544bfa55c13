//! OpenVPN process engine
//!
//! Runs the `openvpn` binary as a child process. The tunnel payload and any
//! credentials are written to private temporary files for the lifetime of
//! the process, and every line of output is forwarded to the session log.

use crate::engine::output_parser::{OutputParser, ParsedLine};
use crate::engine::{
    ConfigurationEvaluation, EngineEvent, EngineSink, PacketFlow, ProtocolEngine,
};
use crate::error::EngineError;
use crate::types::{Password, SessionConfig};
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Sleep;

/// Time between SIGTERM and SIGKILL when stopping
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// How long to keep reading output once the process has exited
const OUTPUT_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Control {
    Stop,
    Restart(Duration),
}

/// Protocol engine backed by the OpenVPN command-line client
pub struct OpenVpnEngine {
    program: PathBuf,
    leading_args: Vec<String>,
    stop_grace: Duration,
    payload: Option<Vec<u8>>,
    remote_host: Option<String>,
    credentials: Option<(String, Password)>,
    private_key_password: Option<Password>,
    control: Option<mpsc::UnboundedSender<Control>>,
    pid: Arc<AtomicU32>,
}

impl OpenVpnEngine {
    /// Engine running `openvpn` from `PATH`
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("openvpn"),
            leading_args: Vec::new(),
            stop_grace: DEFAULT_STOP_GRACE,
            payload: None,
            remote_host: None,
            credentials: None,
            private_key_password: None,
            control: None,
            pid: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Run `program` with `leading_args` in front of the OpenVPN options
    ///
    /// e.g. `("sudo", ["-n", "openvpn"])` to run with elevated privileges.
    pub fn with_program(mut self, program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        self.program = program.into();
        self.leading_args = leading_args;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// PID of the running process, if any
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    fn send(&self, control: Control) {
        match &self.control {
            Some(tx) => {
                if tx.send(control).is_err() {
                    tracing::debug!("OpenVPN process already finished");
                }
            }
            None => tracing::debug!("No OpenVPN process to control"),
        }
    }
}

impl Default for OpenVpnEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEngine for OpenVpnEngine {
    fn apply_configuration(
        &mut self,
        config: &SessionConfig,
    ) -> Result<ConfigurationEvaluation, EngineError> {
        let text = std::str::from_utf8(&config.payload)
            .map_err(|_| EngineError::fatal("OpenVPN configuration is not valid UTF-8"))?;

        let evaluation = evaluate_payload(text);
        tracing::debug!(
            autologin = evaluation.autologin,
            remote = evaluation.remote_host.as_deref().unwrap_or("-"),
            "OpenVPN configuration evaluated"
        );

        self.payload = Some(config.payload.clone());
        self.remote_host = evaluation.remote_host.clone();
        self.private_key_password = config.private_key_password.clone();
        self.credentials = None;

        Ok(evaluation)
    }

    fn provide_credentials(&mut self, username: &str, password: &Password) -> Result<(), EngineError> {
        if username.is_empty() {
            return Err(EngineError::fatal("Username is empty"));
        }
        self.credentials = Some((username.to_string(), password.clone()));
        Ok(())
    }

    fn connect(&mut self, flow: PacketFlow, sink: EngineSink) {
        let Some(payload) = self.payload.clone() else {
            sink.error(EngineError::fatal("No configuration has been applied"));
            return;
        };

        let launch = Launch {
            program: self.program.clone(),
            leading_args: self.leading_args.clone(),
            payload,
            credentials: self.credentials.clone(),
            private_key_password: self.private_key_password.clone(),
            stop_grace: self.stop_grace,
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.control = Some(control_tx);

        tracing::debug!(flow = flow.id(), "Launching OpenVPN");
        tokio::spawn(supervise_process(launch, sink, control_rx, Arc::clone(&self.pid)));
    }

    fn disconnect(&mut self) {
        self.send(Control::Stop);
    }

    fn reconnect(&mut self, after: Duration) {
        self.send(Control::Restart(after));
    }

    fn connection_info(&self) -> Option<String> {
        let remote = self.remote_host.as_deref().unwrap_or("unknown remote");
        Some(match self.pid() {
            Some(pid) => format!("openvpn pid {} talking to {}", pid, remote),
            None => format!("openvpn not running, configured for {}", remote),
        })
    }
}

/// Inspect an OpenVPN config for the remote host and credential needs
pub fn evaluate_payload(text: &str) -> ConfigurationEvaluation {
    let directives = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'));

    let mut evaluation = ConfigurationEvaluation {
        autologin: true,
        remote_host: None,
    };

    for line in directives {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("remote") if evaluation.remote_host.is_none() => {
                evaluation.remote_host = words.next().map(str::to_string);
            }
            Some("auth-user-pass") => evaluation.autologin = false,
            _ => {}
        }
    }

    evaluation
}

struct Launch {
    program: PathBuf,
    leading_args: Vec<String>,
    payload: Vec<u8>,
    credentials: Option<(String, Password)>,
    private_key_password: Option<Password>,
    stop_grace: Duration,
}

/// Temporary files that must outlive the process
struct LaunchFiles {
    config: NamedTempFile,
    auth: Option<NamedTempFile>,
    askpass: Option<NamedTempFile>,
}

impl Launch {
    fn write_files(&self) -> std::io::Result<LaunchFiles> {
        let config = private_file(&self.payload)?;

        let auth = match &self.credentials {
            Some((username, password)) => {
                let contents = format!("{}\n{}\n", username, password.expose());
                Some(private_file(contents.as_bytes())?)
            }
            None => None,
        };

        let askpass = match &self.private_key_password {
            Some(password) => Some(private_file(format!("{}\n", password.expose()).as_bytes())?),
            None => None,
        };

        Ok(LaunchFiles {
            config,
            auth,
            askpass,
        })
    }

    fn command(&self, files: &LaunchFiles) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("--config")
            .arg(files.config.path())
            .args(["--verb", "3"]);

        if let Some(auth) = &files.auth {
            cmd.arg("--auth-user-pass").arg(auth.path()).arg("--auth-nocache");
        }
        if let Some(askpass) = &files.askpass {
            cmd.arg("--askpass").arg(askpass.path());
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// NamedTempFile is created with owner-only permissions
fn private_file(contents: &[u8]) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(file)
}

async fn supervise_process(
    launch: Launch,
    sink: EngineSink,
    mut control: mpsc::UnboundedReceiver<Control>,
    pid: Arc<AtomicU32>,
) {
    let files = match launch.write_files() {
        Ok(files) => files,
        Err(e) => {
            sink.error(EngineError::fatal(format!(
                "Failed to prepare OpenVPN configuration: {}",
                e
            )));
            return;
        }
    };

    let mut child = match launch.command(&files).spawn() {
        Ok(child) => child,
        Err(e) => {
            sink.error(EngineError::fatal(format!(
                "Failed to spawn {}: {}",
                launch.program.display(),
                e
            )));
            return;
        }
    };

    let child_pid = child.id().unwrap_or(0);
    pid.store(child_pid, Ordering::SeqCst);
    tracing::info!("OpenVPN process spawned with PID {}", child_pid);

    let (line_tx, mut lines) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, line_tx));
    }

    let mut output = OutputState::new(sink.clone());
    let mut stopping = false;
    let mut restart: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            Some(line) = lines.recv() => {
                if output.handle(line).await {
                    restart = None;
                    terminate(child_pid, &mut child, launch.stop_grace).await;
                }
            }
            () = restart_due(&mut restart) => {
                restart = None;
                signal_restart(pid.load(Ordering::SeqCst));
            }
            status = child.wait() => {
                pid.store(0, Ordering::SeqCst);
                let status = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                tracing::info!("OpenVPN process {} exited: {}", child_pid, status);

                // Output written just before exit is still in the pipes.
                let drain = async {
                    while let Some(line) = lines.recv().await {
                        output.handle(line).await;
                    }
                };
                if tokio::time::timeout(OUTPUT_DRAIN, drain).await.is_err() {
                    tracing::debug!("Output still open after exit, not waiting for it");
                }

                if stopping {
                    sink.event(EngineEvent::Disconnected);
                } else if !output.failed {
                    sink.error(EngineError::fatal(format!("OpenVPN exited unexpectedly ({})", status)));
                }
                break;
            }
            Some(command) = control.recv() => match command {
                Control::Stop => {
                    stopping = true;
                    restart = None;
                    terminate(child_pid, &mut child, launch.stop_grace).await;
                }
                Control::Restart(_) if stopping => {
                    tracing::debug!("Ignoring restart request while stopping");
                }
                Control::Restart(after) => {
                    restart = Some(Box::pin(tokio::time::sleep(after)));
                }
            }
        }
    }

    drop(files);
}

/// Parse state for one process's output
struct OutputState {
    parser: OutputParser,
    sink: EngineSink,
    peer: Option<String>,
    failed: bool,
}

impl OutputState {
    fn new(sink: EngineSink) -> Self {
        Self {
            parser: OutputParser::new(),
            sink,
            peer: None,
            failed: false,
        }
    }

    /// Forward one line; true when the process has to be stopped
    async fn handle(&mut self, line: String) -> bool {
        self.sink.log(line.clone());
        match self.parser.parse_line(&line) {
            ParsedLine::Event(event) => self.sink.event(event),
            ParsedLine::Peer(address) => self.peer = Some(address),
            ParsedLine::PushReply(mut settings) => {
                settings.remote_address = self.peer.clone();
                let applied = self.sink.configure_tunnel(settings).await.ok().flatten();
                if applied.is_none() {
                    self.failed = true;
                    self.sink
                        .error(EngineError::fatal("Host rejected the tunnel network settings"));
                    return true;
                }
            }
            ParsedLine::Error(error) => {
                self.failed = true;
                self.sink.error(error);
            }
            ParsedLine::Output => {}
        }
        false
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// SIGTERM, then SIGKILL if the process is still around after `grace`
async fn terminate(pid: u32, child: &mut Child, grace: Duration) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid != 0 {
        tracing::info!("Sending SIGTERM to OpenVPN process {}", pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!("Failed to send SIGTERM: {}", e);
        }
    }

    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        tracing::warn!("Graceful shutdown timed out, sending SIGKILL");
        if let Err(e) = child.kill().await {
            tracing::error!("Failed to kill OpenVPN process: {}", e);
        }
    }
}

/// Resolves when a scheduled restart is due; never while none is
async fn restart_due(restart: &mut Option<Pin<Box<Sleep>>>) {
    match restart {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}

/// SIGUSR1 makes OpenVPN re-establish the tunnel without exiting
fn signal_restart(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid == 0 {
        return;
    }
    tracing::info!("Sending SIGUSR1 to OpenVPN process {}", pid);
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGUSR1) {
        tracing::debug!("Failed to send SIGUSR1: {}", e);
    }
}
