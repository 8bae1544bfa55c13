//! `tunwarden connect`: run one session in the foreground
//!
//! Events are printed as they arrive. Ctrl-C disconnects and exits; the
//! control socket stays up in between so other shells can query or retry.

use crate::cli::paint_status;
use crate::daemon::ipc::IpcServer;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tunwarden_core::config::toml_config::load_profile;
use tunwarden_core::config::SupervisorPolicy;
use tunwarden_core::engine::OpenVpnEngine;
use tunwarden_core::host::LoggingHost;
use tunwarden_core::network::{ConnectivityProbe, NetworkMonitor};
use tunwarden_core::session::{SessionEvent, Supervisor};

/// Timeout for a single reachability probe request
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long Ctrl-C waits for the tunnel to come down
const STOP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub profile: PathBuf,
    pub openvpn: PathBuf,
    pub sudo: bool,
    pub socket: PathBuf,
}

pub async fn run_connect(options: ConnectOptions) -> Result<()> {
    let loaded = load_profile(&options.profile)?;
    println!("Loaded profile: {}", loaded.session.name.bold());

    let (connectivity, _poller) = connectivity_source(&loaded.policy).await?;
    let online = *connectivity.borrow();
    if !online {
        println!("{}", "Network appears to be offline".yellow());
    }

    let (supervisor, handle) = Supervisor::new(
        loaded.policy,
        build_engine(&options),
        LoggingHost::new(),
        online,
    );
    let mut events = handle.subscribe();
    let supervisor_task = supervisor.spawn();
    let _follower = handle.follow_connectivity(connectivity);

    handle.select_profile(loaded.session).await?;

    let server = IpcServer::bind(&options.socket)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ipc_task = tokio::spawn(server.run(handle.clone(), shutdown_rx));

    match handle.connect().await {
        Ok(ticket) => {
            tokio::spawn(async move {
                if let Err(e) = ticket.wait().await {
                    println!("{} {}", "✗".red().bold(), e.message.red());
                }
            });
        }
        Err(e) => println!("{} {}", "✗".red().bold(), e),
    }

    println!("Press Ctrl-C to disconnect");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    println!("Disconnecting...");
    match handle.disconnect().await {
        Ok(ticket) => {
            if tokio::time::timeout(STOP_TIMEOUT, ticket.wait()).await.is_err() {
                warn!("Tunnel did not stop within {:?}", STOP_TIMEOUT);
            }
        }
        Err(e) => debug!("Disconnect request: {}", e),
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = handle.shutdown().await {
        debug!("Supervisor shutdown: {}", e);
    }
    supervisor_task.await.context("Supervisor task failed")?;
    ipc_task.await.context("IPC server task failed")?;

    println!("{} Disconnected", "✓".green());
    Ok(())
}

fn build_engine(options: &ConnectOptions) -> OpenVpnEngine {
    let engine = OpenVpnEngine::new();
    if options.sudo {
        engine.with_program(
            "sudo",
            vec!["-n".to_string(), options.openvpn.to_string_lossy().into_owned()],
        )
    } else {
        engine.with_program(options.openvpn.clone(), Vec::new())
    }
}

/// Pick where connectivity changes come from
///
/// An explicit probe endpoint wins. Otherwise NetworkManager is asked; when
/// it is not reachable the network is assumed to stay up.
async fn connectivity_source(
    policy: &SupervisorPolicy,
) -> Result<(watch::Receiver<bool>, JoinHandle<()>)> {
    let interval = policy.connectivity_poll();

    if let Some(endpoint) = &policy.probe_endpoint {
        info!("Following connectivity via {}", endpoint);
        let probe = ConnectivityProbe::new(endpoint.clone(), PROBE_TIMEOUT)?;
        return Ok(probe.watch(interval));
    }

    match NetworkMonitor::new().await {
        Ok(monitor) => {
            info!("Following connectivity via NetworkManager");
            Ok(monitor.watch(interval).await)
        }
        Err(e) => {
            warn!("NetworkManager unavailable ({}), assuming the network is up", e);
            let (tx, rx) = watch::channel(true);
            Ok((rx, tokio::spawn(async move { tx.closed().await })))
        }
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StatusChanged(status) => println!("● {}", paint_status(*status)),
        SessionEvent::ConnectionFailed(reason) => {
            println!("{} {}", "✗".red().bold(), reason.message().red());
            if reason.suggests_other_server() {
                println!("  Try connecting to a different server.");
            }
        }
        SessionEvent::NoInternetAlert(message) => {
            println!("{} {}", "⚠".yellow().bold(), message.yellow())
        }
        SessionEvent::NoInternetDismissed => {
            println!("{}", "Network connection restored".green())
        }
    }
}
