//! Session log stream
//!
//! An append-only, timestamp-ordered record of everything the engine and the
//! supervisor say about a session. Exactly one `LogStream` writes; any number
//! of `LogView`s read snapshots from other tasks.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    /// Classify a free-text engine line
    ///
    /// Lines mentioning an error or exception are errors, everything else is
    /// informational.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("error") || lower.contains("exception") {
            LogLevel::Error
        } else {
            LogLevel::Info
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
            LogLevel::Alert => "alert",
            LogLevel::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Which side of the system produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// The tunnel provider and the engine it drives
    TunnelProvider,
    /// The session supervisor
    Supervisor,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::TunnelProvider => f.write_str("tunnel-provider"),
            Subsystem::Supervisor => f.write_str("supervisor"),
        }
    }
}

/// A single immutable log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub text: String,
    pub subsystem: Subsystem,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.subsystem,
            self.text
        )
    }
}

type Entries = Arc<RwLock<Vec<LogEntry>>>;

fn read(entries: &Entries) -> RwLockReadGuard<'_, Vec<LogEntry>> {
    entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(entries: &Entries) -> RwLockWriteGuard<'_, Vec<LogEntry>> {
    entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The single writer of a session log
///
/// Not `Clone`: whoever owns it is the only task allowed to append.
#[derive(Debug, Default)]
pub struct LogStream {
    entries: Entries,
}

impl LogStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and mirror it into tracing
    ///
    /// Timestamps never go backwards, even if the wall clock does.
    pub fn append(&mut self, level: LogLevel, subsystem: Subsystem, text: impl Into<String>) {
        let text = text.into();
        mirror(level, subsystem, &text);

        let mut entries = write(&self.entries);
        let now = Utc::now();
        let timestamp = match entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        entries.push(LogEntry {
            timestamp,
            level,
            text,
            subsystem,
        });
    }

    /// Copy of the last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        tail_of(&self.entries, n)
    }

    /// Copy of entries `start..end`, clamped to what exists
    pub fn range(&self, start: usize, end: usize) -> Vec<LogEntry> {
        let entries = read(&self.entries);
        let end = end.min(entries.len());
        let start = start.min(end);
        entries[start..end].to_vec()
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A read-only handle for observers
    pub fn view(&self) -> LogView {
        LogView {
            entries: Arc::clone(&self.entries),
        }
    }
}

/// Read-only access to a session log from any task
#[derive(Debug, Clone)]
pub struct LogView {
    entries: Entries,
}

impl LogView {
    /// Consistent copy of every entry appended so far
    pub fn snapshot(&self) -> Vec<LogEntry> {
        read(&self.entries).clone()
    }

    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        tail_of(&self.entries, n)
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn tail_of(entries: &Entries, n: usize) -> Vec<LogEntry> {
    let entries = read(entries);
    let start = entries.len().saturating_sub(n);
    entries[start..].to_vec()
}

fn mirror(level: LogLevel, subsystem: Subsystem, text: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(%subsystem, "{}", text),
        LogLevel::Info | LogLevel::Notice => tracing::info!(%subsystem, "{}", text),
        LogLevel::Warning => tracing::warn!(%subsystem, "{}", text),
        LogLevel::Error | LogLevel::Critical | LogLevel::Alert | LogLevel::Emergency => {
            tracing::error!(%subsystem, "{}", text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_level() {
        assert_eq!(LogLevel::classify("TLS Error: handshake"), LogLevel::Error);
        assert_eq!(LogLevel::classify("caught EXCEPTION in read"), LogLevel::Error);
        assert_eq!(LogLevel::classify("Initialization Sequence Completed"), LogLevel::Info);
    }

    #[test]
    fn test_tail_is_bounded_and_ordered() {
        let mut stream = LogStream::new();
        for i in 0..15 {
            stream.append(LogLevel::Info, Subsystem::TunnelProvider, format!("line {}", i));
        }

        let tail = stream.tail(10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail.first().unwrap().text, "line 5");
        assert_eq!(tail.last().unwrap().text, "line 14");
        assert!(tail.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_view_sees_appends() {
        let mut stream = LogStream::new();
        let view = stream.view();
        assert!(view.is_empty());

        stream.append(LogLevel::Warning, Subsystem::Supervisor, "hello");
        assert_eq!(view.len(), 1);
        assert_eq!(view.snapshot()[0].subsystem, Subsystem::Supervisor);
        assert_eq!(view.tail(100).len(), 1);
    }
}
