//! Tests for log-pattern failure detection

use tunwarden_core::logstream::{LogEntry, LogLevel, LogStream, Subsystem};
use tunwarden_core::session::detector::{MULTIPLE_ATTEMPTS_FAILED, TIMEOUT_NEEDLES};
use tunwarden_core::session::{FailureDetector, FailureReason, PatternDetector};

fn entries(lines: &[&str]) -> Vec<LogEntry> {
    let mut stream = LogStream::new();
    for line in lines {
        stream.append(LogLevel::classify(line), Subsystem::TunnelProvider, *line);
    }
    stream.tail(stream.len())
}

fn unresponsive() -> Option<FailureReason> {
    Some(FailureReason::ServerUnresponsive(
        MULTIPLE_ATTEMPTS_FAILED.to_string(),
    ))
}

#[test]
fn test_three_timeouts_mean_server_unresponsive() {
    let detector = PatternDetector::default();
    let window = entries(&[
        "Server poll timeout, trying next remote entry",
        "Connection timeout while resolving",
        "TLS handshake failed",
    ]);
    assert_eq!(detector.evaluate(&window), unresponsive());
}

#[test]
fn test_two_timeouts_are_not_enough() {
    let detector = PatternDetector::default();
    let window = entries(&[
        "Server poll timeout, trying next remote entry",
        "UDP link remote: [AF_INET]203.0.113.7:1194",
        "Inactivity timeout (--ping-restart), restarting",
    ]);
    assert_eq!(detector.evaluate(&window), None);
}

#[test]
fn test_every_timeout_needle_counts() {
    let detector = PatternDetector::new(10, TIMEOUT_NEEDLES.len());
    let lines: Vec<String> = TIMEOUT_NEEDLES
        .iter()
        .map(|needle| format!("event: {}", needle.to_uppercase()))
        .collect();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    assert_eq!(detector.evaluate(&entries(&lines)), unresponsive());
}

#[test]
fn test_auth_failure_wins_over_timeouts() {
    let detector = PatternDetector::default();
    let window = entries(&[
        "Server poll timeout",
        "Server poll timeout",
        "AUTH: Received control message: AUTH_FAILED",
        "Server poll timeout",
        "Server poll timeout",
    ]);
    assert_eq!(
        detector.evaluate(&window),
        Some(FailureReason::AuthenticationFailed)
    );
}

#[test]
fn test_certificate_and_refusal() {
    let detector = PatternDetector::default();
    assert_eq!(
        detector.evaluate(&entries(&[
            "VERIFY ERROR: depth=0, error=certificate verify failed"
        ])),
        Some(FailureReason::CertificateInvalid)
    );
    assert_eq!(
        detector.evaluate(&entries(&["TCP: connect to [AF_INET]203.0.113.7:443 failed: Connection refused"])),
        Some(FailureReason::ConnectionRefused)
    );
    assert_eq!(
        detector.evaluate(&entries(&["Authentication failed for user alice"])),
        Some(FailureReason::AuthenticationFailed)
    );
}

#[test]
fn test_only_the_last_window_is_considered() {
    let detector = PatternDetector::default();
    let mut lines = vec!["AUTH_FAILED"];
    lines.extend(std::iter::repeat("noise").take(10));
    assert_eq!(detector.evaluate(&entries(&lines)), None);
}

#[test]
fn test_empty_and_quiet_windows() {
    let detector = PatternDetector::default();
    assert_eq!(detector.evaluate(&[]), None);
    assert_eq!(
        detector.evaluate(&entries(&[
            "OpenVPN 2.6.8 x86_64-pc-linux-gnu",
            "Initialization Sequence Completed",
        ])),
        None
    );
}

#[test]
fn test_custom_threshold_and_needles() {
    let detector = PatternDetector::new(5, 2)
        .with_timeout_needles(&["keepalive lost"])
        .unwrap();
    assert_eq!(detector.threshold(), 2);
    assert_eq!(detector.window(), 5);

    let window = entries(&["keepalive lost", "Server poll timeout", "keepalive lost"]);
    assert_eq!(detector.evaluate(&window), unresponsive());
}

#[test]
fn test_works_as_trait_object() {
    let detector: Box<dyn FailureDetector> = Box::new(PatternDetector::default());
    assert_eq!(detector.window(), 10);
    assert_eq!(
        detector.evaluate(&entries(&["cert_verify_fail"])),
        Some(FailureReason::CertificateInvalid)
    );
}

#[test]
fn test_failure_reason_messages() {
    assert_eq!(
        FailureReason::Timeout.message(),
        "Connection timed out. The server is not responding."
    );
    assert_eq!(FailureReason::NetworkLost.category(), "network_lost");
    assert!(FailureReason::ConnectionRefused.suggests_other_server());
    assert!(!FailureReason::AuthenticationFailed.suggests_other_server());
}
