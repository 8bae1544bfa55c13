//! `tunwarden status`

use crate::cli::paint_status;
use crate::daemon::ipc::IpcClient;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::path::PathBuf;
use tunwarden_core::session::SessionSnapshot;

pub async fn run_status(socket: PathBuf, log_lines: Option<usize>) -> Result<()> {
    let client = IpcClient::new(socket);
    let snapshot = client.get_status().await?;
    print_snapshot(&snapshot, Utc::now());

    if let Some(lines) = log_lines {
        println!();
        for line in client.logs(lines).await? {
            println!("{}", line);
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot, now: DateTime<Utc>) {
    println!("Status:   {}", paint_status(snapshot.status));
    println!(
        "Profile:  {}",
        snapshot.profile_name.as_deref().unwrap_or("(none)")
    );

    if let Some(since) = snapshot.connected_since {
        println!(
            "Since:    {} ({})",
            since.format("%Y-%m-%d %H:%M:%S UTC"),
            format_uptime((now - since).num_seconds())
        );
    }

    let network = if snapshot.network_available {
        "online".green()
    } else {
        "offline".red()
    };
    println!("Network:  {}", network);

    if let Some(reason) = &snapshot.last_failure {
        println!("Failure:  {}", reason.message().red());
    }
    if snapshot.retry_pending {
        println!("Retry:    scheduled");
    }
    if snapshot.deadline_armed {
        println!("Deadline: connect attempt is being timed");
    }
}

/// Render a connection age like `1h 02m 05s`
fn format_uptime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (hours, minutes, secs) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
