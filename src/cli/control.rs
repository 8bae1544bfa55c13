//! `tunwarden disconnect` and `tunwarden retry`

use crate::daemon::ipc::IpcClient;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

/// Ask the running session to disconnect and wait until it has
pub async fn run_disconnect(socket: PathBuf) -> Result<()> {
    IpcClient::new(socket).disconnect().await?;
    println!("{} Disconnected", "✓".green());
    Ok(())
}

/// Retry the last failed connect attempt
pub async fn run_retry(socket: PathBuf) -> Result<()> {
    IpcClient::new(socket).retry().await?;
    println!("Retry scheduled");
    Ok(())
}
