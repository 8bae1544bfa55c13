//! Core library for the tunwarden VPN session supervisor
//!
//! Drives a tunnel protocol engine through connect, reconnect and disconnect,
//! keeps the authoritative connection status, and turns engine output and
//! host connectivity into upstream failure events.

pub mod error;
pub mod logstream;
pub mod types;

pub mod config;
pub mod engine;
pub mod host;
pub mod network;
pub mod session;

/// Initialize logging infrastructure
///
/// Logs to the systemd journal when running under systemd, otherwise to
/// stderr with pretty formatting. `verbose` lowers the level to DEBUG.
pub fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(level)
                .try_init()?;
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .with(level)
        .try_init()?;

    Ok(())
}
