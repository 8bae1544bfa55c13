//! `tunwarden check-config`: validate a profile without connecting

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tunwarden_core::config::toml_config::load_profile;
use tunwarden_core::engine::openvpn::evaluate_payload;
use tunwarden_core::error::{ConfigError, TunnelError};

pub fn run_check_config(path: &Path) -> Result<()> {
    let loaded = load_profile(path)?;
    let session = &loaded.session;
    let policy = &loaded.policy;

    let text = std::str::from_utf8(&session.payload).map_err(|_| {
        TunnelError::Config(ConfigError::ValidationError {
            message: "OpenVPN config is not valid UTF-8".to_string(),
        })
    })?;
    let evaluation = evaluate_payload(text);

    println!("{} {} is valid", "✓".green(), path.display());
    println!("Profile:        {}", session.name.bold());
    println!(
        "Remote:         {}",
        evaluation.remote_host.as_deref().unwrap_or("(not set)")
    );
    match session.auth.username() {
        Some(username) => println!("Auth:           username/password ({})", username),
        None => println!("Auth:           none"),
    }
    if !evaluation.autologin && session.auth.is_anonymous() {
        println!(
            "{} config asks for auth-user-pass but the profile has no credentials",
            "⚠".yellow()
        );
    }
    if !session.dns_override.is_empty() {
        println!("DNS override:   {}", session.dns_override.join(", "));
    }

    println!("Connect timeout: {}s", policy.connect_timeout_secs);
    println!(
        "Failure detector: {} timeouts within {} lines",
        policy.detector_threshold, policy.detector_window
    );
    println!(
        "Connectivity:   {}",
        policy
            .probe_endpoint
            .as_deref()
            .unwrap_or("NetworkManager")
    );
    Ok(())
}
