//! tunwarden - VPN session supervisor
//!
//! Runs one OpenVPN session in the foreground, tracks its status and turns
//! engine output and network loss into readable failures. Other invocations
//! talk to the running session over a Unix socket.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tunwarden_core::config::toml_config::get_profile_path;
use tunwarden_core::error::TunnelError;
use tunwarden_core::init_logging;

mod cli;
mod daemon;

#[derive(Parser)]
#[command(name = "tunwarden")]
#[command(about = "Supervise a VPN tunnel: status tracking, failure detection and network-loss handling")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Control socket path
    #[arg(long, global = true, env = "TUNWARDEN_SOCKET")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and supervise the session until Ctrl-C
    Connect {
        /// Profile file (defaults to ~/.config/tunwarden/profile.toml)
        profile: Option<PathBuf>,

        /// OpenVPN binary to run
        #[arg(long, default_value = "openvpn")]
        openvpn: PathBuf,

        /// Run OpenVPN through `sudo -n`
        #[arg(long)]
        sudo: bool,
    },
    /// Show the status of the running session
    Status {
        /// Also print the last N session log lines
        #[arg(long, value_name = "N")]
        logs: Option<usize>,
    },
    /// Disconnect the running session
    Disconnect,
    /// Retry the last failed connect attempt
    Retry,
    /// Validate a profile file without connecting
    CheckConfig {
        /// Profile file (defaults to ~/.config/tunwarden/profile.toml)
        profile: Option<PathBuf>,
    },
}

fn profile_or_default(profile: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match profile {
        Some(path) => Ok(path),
        None => Ok(get_profile_path()?),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let socket = cli
        .socket
        .unwrap_or_else(daemon::ipc::get_default_socket_path);

    match cli.command {
        Commands::Connect {
            profile,
            openvpn,
            sudo,
        } => {
            cli::connect::run_connect(cli::connect::ConnectOptions {
                profile: profile_or_default(profile)?,
                openvpn,
                sudo,
                socket,
            })
            .await
        }
        Commands::Status { logs } => cli::status::run_status(socket, logs).await,
        Commands::Disconnect => cli::control::run_disconnect(socket).await,
        Commands::Retry => cli::control::run_retry(socket).await,
        Commands::CheckConfig { profile } => {
            cli::check_config::run_check_config(&profile_or_default(profile)?)
        }
    }
}

/// Configuration problems exit with 2, everything else with 1
fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<TunnelError>() {
        Some(TunnelError::Config(_)) | Some(TunnelError::Toml(_)) => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    }
}
