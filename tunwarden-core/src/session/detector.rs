//! Log-pattern failure detection
//!
//! The engine does not report every failure structurally; some only show up
//! as free text. The detector looks at a short suffix of the session log and
//! infers a `FailureReason` from it.

use crate::logstream::LogEntry;
use crate::session::events::FailureReason;
use regex::{Regex, RegexBuilder};

/// Detail attached to `ServerUnresponsive` by the accumulated-timeout rule
pub const MULTIPLE_ATTEMPTS_FAILED: &str = "Multiple connection attempts failed";

/// Text classifier over the tail of the session log
pub trait FailureDetector: Send {
    /// How many of the most recent entries `evaluate` wants to see
    fn window(&self) -> usize;

    /// Inspect the window (oldest first) and name a failure if there is one
    fn evaluate(&self, window: &[LogEntry]) -> Option<FailureReason>;
}

/// One single-shot rule: any of the needles means this reason
#[derive(Debug, Clone)]
pub struct PatternRule {
    pattern: Regex,
    reason: FailureReason,
}

impl PatternRule {
    /// Build a case-insensitive rule matching any of the literal needles
    pub fn new(needles: &[&str], reason: FailureReason) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: literal_alternation(needles)?,
            reason,
        })
    }

    pub fn reason(&self) -> &FailureReason {
        &self.reason
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Substring matcher for OpenVPN-style engine output
///
/// Two rules, evaluated in this order:
/// 1. single-shot: the most recent entry naming an auth, certificate or
///    refusal failure decides the reason;
/// 2. accumulated: `threshold` or more timeout lines in the window mean the
///    server is unresponsive.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    window: usize,
    threshold: usize,
    timeout_pattern: Regex,
    single_shot: Vec<PatternRule>,
}

/// Needles counted by the accumulated-timeout rule
pub const TIMEOUT_NEEDLES: &[&str] = &[
    "server poll timeout",
    "connection timeout",
    "tls handshake failed",
    "server_poll",
    "inactivity timeout",
];

impl PatternDetector {
    /// Create a detector with the built-in rules
    pub fn new(window: usize, threshold: usize) -> Self {
        let timeout_pattern =
            literal_alternation(TIMEOUT_NEEDLES).expect("Failed to compile timeout pattern");

        let single_shot = vec![
            PatternRule::new(
                &["auth_failed", "authentication failed"],
                FailureReason::AuthenticationFailed,
            )
            .expect("Failed to compile auth pattern"),
            PatternRule::new(
                &["certificate verify failed", "cert_verify_fail"],
                FailureReason::CertificateInvalid,
            )
            .expect("Failed to compile certificate pattern"),
            PatternRule::new(&["connection refused"], FailureReason::ConnectionRefused)
                .expect("Failed to compile refused pattern"),
        ];

        Self {
            window,
            threshold,
            timeout_pattern,
            single_shot,
        }
    }

    /// Replace the single-shot rules; earlier rules win within one entry
    pub fn with_rules(mut self, rules: Vec<PatternRule>) -> Self {
        self.single_shot = rules;
        self
    }

    /// Replace the accumulated-timeout needles
    pub fn with_timeout_needles(mut self, needles: &[&str]) -> Result<Self, regex::Error> {
        self.timeout_pattern = literal_alternation(needles)?;
        Ok(self)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn single_shot_match(&self, window: &[LogEntry]) -> Option<FailureReason> {
        window.iter().rev().find_map(|entry| {
            self.single_shot
                .iter()
                .find(|rule| rule.matches(&entry.text))
                .map(|rule| rule.reason.clone())
        })
    }

    fn timeout_count(&self, window: &[LogEntry]) -> usize {
        window
            .iter()
            .filter(|entry| self.timeout_pattern.is_match(&entry.text))
            .count()
    }
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(10, 3)
    }
}

impl FailureDetector for PatternDetector {
    fn window(&self) -> usize {
        self.window
    }

    fn evaluate(&self, window: &[LogEntry]) -> Option<FailureReason> {
        let start = window.len().saturating_sub(self.window);
        let window = &window[start..];

        if let Some(reason) = self.single_shot_match(window) {
            return Some(reason);
        }

        let timeouts = self.timeout_count(window);
        if timeouts >= self.threshold {
            tracing::debug!(timeouts, threshold = self.threshold, "Timeout threshold reached");
            return Some(FailureReason::ServerUnresponsive(
                MULTIPLE_ATTEMPTS_FAILED.to_string(),
            ));
        }

        None
    }
}

fn literal_alternation(needles: &[&str]) -> Result<Regex, regex::Error> {
    let alternation = needles
        .iter()
        .map(|needle| regex::escape(needle))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation).case_insensitive(true).build()
}
