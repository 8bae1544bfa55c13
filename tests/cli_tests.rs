//! Integration tests for the tunwarden binary
//!
//! Control commands are pointed at a socket served by the test itself, so
//! no tunnel or privileges are needed.

use chrono::Utc;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::process::{Command, Output};
use std::thread;
use tempfile::tempdir;
use tunwarden_core::session::{ConnectionStatus, FailureReason, SessionSnapshot};

const PAYLOAD: &str = "client\ndev tun\nremote vpn.example.com 1194\nauth-user-pass\n";

fn tunwarden(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tunwarden"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("TUNWARDEN_SOCKET")
        .output()
        .expect("Failed to run tunwarden")
}

fn write_profile(dir: &Path, extra: &str) -> String {
    fs::write(dir.join("de.ovpn"), PAYLOAD).unwrap();
    let path = dir.join("profile.toml");
    fs::write(
        &path,
        format!(
            "[profile]\nname = \"Frankfurt\"\nconfig_file = \"de.ovpn\"\nusername = \"alice\"\npassword = \"hunter2\"\n{}",
            extra
        ),
    )
    .unwrap();
    path.to_string_lossy().into_owned()
}

/// Answer exactly one request on `socket`, checking what was asked
fn serve_once(socket: &Path, expected_request: &'static str, response: String) -> thread::JoinHandle<()> {
    let listener = UnixListener::bind(socket).unwrap();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(stream.try_clone().unwrap())
            .read_line(&mut line)
            .unwrap();
        assert_eq!(line.trim_end(), expected_request);
        writeln!(stream, "{}", response).unwrap();
    })
}

#[test]
fn test_help_lists_commands() {
    let output = tunwarden(&["--help"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["connect", "status", "disconnect", "retry", "check-config"] {
        assert!(stdout.contains(command), "help should mention {}", command);
    }
}

#[test]
fn test_check_config_valid_profile() {
    let dir = tempdir().unwrap();
    let profile = write_profile(dir.path(), "");

    let output = tunwarden(&["check-config", &profile]);
    assert!(output.status.success(), "{:?}", output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));
    assert!(stdout.contains("Frankfurt"));
    assert!(stdout.contains("vpn.example.com"));
    assert!(stdout.contains("username/password (alice)"));
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn test_check_config_errors_exit_with_2() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("nope.toml");
    let output = tunwarden(&["check-config", &missing.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));

    let profile = write_profile(dir.path(), "\n[supervisor]\nconnect_timeout_secs = 0\n");
    let output = tunwarden(&["check-config", &profile]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid supervisor policy"));

    let garbage = dir.path().join("garbage.toml");
    fs::write(&garbage, "[profile\n").unwrap();
    let output = tunwarden(&["check-config", &garbage.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_connect_with_missing_profile_exits_with_2() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("tunwarden.sock");
    let output = tunwarden(&[
        "connect",
        &dir.path().join("absent.toml").to_string_lossy(),
        "--socket",
        &socket.to_string_lossy(),
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!socket.exists());
}

#[test]
fn test_status_without_running_session() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("tunwarden.sock");

    let output = tunwarden(&["status", "--socket", &socket.to_string_lossy()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("tunwarden is not running"));
}

#[test]
fn test_status_prints_snapshot() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("tunwarden.sock");
    let snapshot = SessionSnapshot {
        status: ConnectionStatus::Connected,
        connected_since: Some(Utc::now()),
        last_failure: Some(FailureReason::Timeout),
        profile_name: Some("Frankfurt".to_string()),
        network_available: true,
        alert_outstanding: false,
        deadline_armed: false,
        retry_pending: false,
    };
    let response = serde_json::json!({ "StatusResponse": snapshot }).to_string();
    let server = serve_once(&socket, "\"StatusRequest\"", response);

    let output = tunwarden(&["status", "--socket", &socket.to_string_lossy()]);
    server.join().unwrap();
    assert!(output.status.success(), "{:?}", output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Connected"));
    assert!(stdout.contains("Frankfurt"));
    assert!(stdout.contains("online"));
    assert!(stdout.contains("Connection timed out"));
}

#[test]
fn test_disconnect_over_socket() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("tunwarden.sock");
    let server = serve_once(
        &socket,
        "\"DisconnectRequest\"",
        r#"{"DisconnectResponse":{"Ok":null}}"#.to_string(),
    );

    let output = tunwarden(&["disconnect", "--socket", &socket.to_string_lossy()]);
    server.join().unwrap();
    assert!(output.status.success(), "{:?}", output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Disconnected"));
}

#[test]
fn test_rejected_retry_exits_with_1() {
    let dir = tempdir().unwrap();
    let socket = dir.path().join("tunwarden.sock");
    let server = serve_once(
        &socket,
        "\"RetryRequest\"",
        r#"{"RetryResponse":{"Err":"No network connection available"}}"#.to_string(),
    );

    let output = tunwarden(&["retry", "--socket", &socket.to_string_lossy()]);
    server.join().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No network connection available"));
}
