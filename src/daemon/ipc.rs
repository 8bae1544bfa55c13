//! Unix socket IPC between `tunwarden connect` and the control commands
//!
//! One newline-terminated JSON request per connection, answered by one
//! newline-terminated JSON response.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tunwarden_core::session::{SessionSnapshot, SupervisorHandle};

/// Requests larger than this are cut off and fail to parse
const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

/// IPC message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcMessage {
    /// Request current session snapshot
    StatusRequest,
    StatusResponse(SessionSnapshot),
    /// Request to disconnect; answered once the tunnel is down
    DisconnectRequest,
    DisconnectResponse(Result<(), String>),
    /// Retry the last failed attempt
    RetryRequest,
    RetryResponse(Result<(), String>),
    /// Most recent session log lines
    LogsRequest { lines: usize },
    LogsResponse(Vec<String>),
    /// The request could not be served
    Error(String),
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("tunwarden is not running (no socket at {path})")]
    NotRunning { path: String },

    #[error("Failed to bind IPC socket {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed IPC message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Connection closed before a message arrived")]
    Closed,

    #[error("Unexpected response to {0} request")]
    UnexpectedResponse(&'static str),

    #[error("{0}")]
    Rejected(String),
}

async fn read_message(stream: &mut BufReader<impl AsyncRead + Unpin>) -> Result<IpcMessage, IpcError> {
    let mut line = String::new();
    let read = stream.take(MAX_MESSAGE_BYTES).read_line(&mut line).await?;
    if read == 0 {
        return Err(IpcError::Closed);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

async fn write_message(
    stream: &mut (impl AsyncWrite + Unpin),
    message: &IpcMessage,
) -> Result<(), IpcError> {
    let mut data = serde_json::to_vec(message)?;
    data.push(b'\n');
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

/// IPC client used by the control commands
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Send a message and receive a response
    pub async fn send_message(&self, message: &IpcMessage) -> Result<IpcMessage, IpcError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::ConnectionRefused => IpcError::NotRunning {
                    path: self.socket_path.display().to_string(),
                },
                _ => IpcError::Io(e),
            })?;

        let (reader, mut writer) = stream.into_split();
        write_message(&mut writer, message).await?;
        read_message(&mut BufReader::new(reader)).await
    }

    pub async fn get_status(&self) -> Result<SessionSnapshot, IpcError> {
        match self.send_message(&IpcMessage::StatusRequest).await? {
            IpcMessage::StatusResponse(snapshot) => Ok(snapshot),
            IpcMessage::Error(reason) => Err(IpcError::Rejected(reason)),
            _ => Err(IpcError::UnexpectedResponse("status")),
        }
    }

    /// Request disconnection and wait until it is done
    pub async fn disconnect(&self) -> Result<(), IpcError> {
        match self.send_message(&IpcMessage::DisconnectRequest).await? {
            IpcMessage::DisconnectResponse(result) => result.map_err(IpcError::Rejected),
            IpcMessage::Error(reason) => Err(IpcError::Rejected(reason)),
            _ => Err(IpcError::UnexpectedResponse("disconnect")),
        }
    }

    pub async fn retry(&self) -> Result<(), IpcError> {
        match self.send_message(&IpcMessage::RetryRequest).await? {
            IpcMessage::RetryResponse(result) => result.map_err(IpcError::Rejected),
            IpcMessage::Error(reason) => Err(IpcError::Rejected(reason)),
            _ => Err(IpcError::UnexpectedResponse("retry")),
        }
    }

    pub async fn logs(&self, lines: usize) -> Result<Vec<String>, IpcError> {
        match self.send_message(&IpcMessage::LogsRequest { lines }).await? {
            IpcMessage::LogsResponse(lines) => Ok(lines),
            IpcMessage::Error(reason) => Err(IpcError::Rejected(reason)),
            _ => Err(IpcError::UnexpectedResponse("logs")),
        }
    }
}

/// IPC server answering control requests against a running supervisor
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind the socket, replacing a stale one
    ///
    /// The socket is only accessible to the current user.
    pub fn bind(socket_path: &Path) -> Result<Self, IpcError> {
        let bind_error = |source| IpcError::Bind {
            path: socket_path.display().to_string(),
            source,
        };

        if socket_path.exists() {
            std::fs::remove_file(socket_path).map_err(bind_error)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_error)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(bind_error)?;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
            .map_err(bind_error)?;

        info!("IPC server listening on {}", socket_path.display());
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Serve requests until `shutdown` flips to true, then remove the socket
    pub async fn run(self, handle: SupervisorHandle, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &handle).await {
                                debug!("IPC connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("IPC accept error: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Failed to remove IPC socket: {}", e);
        }
    }
}

async fn handle_connection(stream: UnixStream, handle: &SupervisorHandle) -> Result<(), IpcError> {
    let (reader, mut writer) = stream.into_split();
    let response = match read_message(&mut BufReader::new(reader)).await {
        Ok(request) => respond(handle, request).await,
        Err(IpcError::Codec(e)) => IpcMessage::Error(format!("Malformed request: {}", e)),
        Err(e) => return Err(e),
    };
    write_message(&mut writer, &response).await
}

async fn respond(handle: &SupervisorHandle, request: IpcMessage) -> IpcMessage {
    match request {
        IpcMessage::StatusRequest => match handle.snapshot().await {
            Ok(snapshot) => IpcMessage::StatusResponse(snapshot),
            Err(e) => IpcMessage::Error(e.to_string()),
        },
        IpcMessage::DisconnectRequest => {
            let result = match handle.disconnect().await {
                Ok(ticket) => {
                    ticket.wait().await;
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            };
            IpcMessage::DisconnectResponse(result)
        }
        IpcMessage::RetryRequest => {
            IpcMessage::RetryResponse(handle.retry().await.map_err(|e| e.to_string()))
        }
        IpcMessage::LogsRequest { lines } => IpcMessage::LogsResponse(
            handle
                .logs()
                .tail(lines)
                .iter()
                .map(ToString::to_string)
                .collect(),
        ),
        other => IpcMessage::Error(format!("Not a request: {:?}", other)),
    }
}

/// Get the default socket path
pub fn get_default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        Path::new(&runtime_dir).join("tunwarden.sock")
    } else {
        Path::new("/tmp").join(format!("tunwarden-{}.sock", nix::unistd::getuid()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tunwarden_core::config::SupervisorPolicy;
    use tunwarden_core::engine::OpenVpnEngine;
    use tunwarden_core::host::LoggingHost;
    use tunwarden_core::session::{ConnectionStatus, Supervisor};

    async fn serve(socket: &Path) -> (SupervisorHandle, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (supervisor, handle) = Supervisor::new(
            SupervisorPolicy::default(),
            OpenVpnEngine::new(),
            LoggingHost::new(),
            true,
        );
        supervisor.spawn();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = IpcServer::bind(socket).unwrap();
        let task = tokio::spawn(server.run(handle.clone(), shutdown_rx));
        (handle, shutdown_tx, task)
    }

    #[tokio::test]
    async fn test_status_over_socket() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("tunwarden.sock");
        let (_handle, shutdown, task) = serve(&socket).await;

        let mode = std::fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let client = IpcClient::new(socket.clone());
        let snapshot = client.get_status().await.unwrap();
        assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
        assert!(snapshot.profile_name.is_none());
        assert!(snapshot.network_available);

        shutdown.send(true).unwrap();
        task.await.unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_control_requests() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("tunwarden.sock");
        let (_handle, _shutdown, _task) = serve(&socket).await;
        let client = IpcClient::new(socket);

        // Nothing is running, so disconnect is a no-op.
        client.disconnect().await.unwrap();

        match client.retry().await {
            Err(IpcError::Rejected(reason)) => assert!(!reason.is_empty()),
            other => panic!("Expected rejection, got {:?}", other),
        }

        assert!(client.logs(10).await.unwrap().len() <= 10);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_response() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("tunwarden.sock");
        let (_handle, _shutdown, _task) = serve(&socket).await;

        let stream = UnixStream::connect(&socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{not json}\n").await.unwrap();

        match read_message(&mut BufReader::new(reader)).await.unwrap() {
            IpcMessage::Error(reason) => assert!(reason.starts_with("Malformed request")),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_socket_means_not_running() {
        let dir = tempdir().unwrap();
        let client = IpcClient::new(dir.path().join("absent.sock"));
        assert!(matches!(
            client.get_status().await,
            Err(IpcError::NotRunning { .. })
        ));
    }

    #[test]
    fn test_default_socket_path_name() {
        let path = get_default_socket_path();
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("tunwarden"));
        assert!(name.ends_with(".sock"));
    }
}
