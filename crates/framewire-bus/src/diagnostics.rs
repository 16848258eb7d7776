//! Diagnostic log: `(tag, message)` sink with a history ring buffer.
//!
//! Every entry is forwarded to `tracing` at the matching level with the tag as
//! a structured field, and retained in a bounded ring buffer so that failures
//! the bus swallows at the boundary remain observable.

use framewire_types::config::DEFAULT_DIAGNOSTIC_HISTORY;
use framewire_types::{Diagnostic, Severity};
use std::collections::VecDeque;
use std::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Tag used by the bus facade.
pub const TAG_BUS: &str = "framewire.bus";
/// Tag used by the transport adapter.
pub const TAG_TRANSPORT: &str = "framewire.transport";
/// Tag used by the handshake.
pub const TAG_HANDSHAKE: &str = "framewire.handshake";
/// Tag used by the built-in echo handler.
pub const TAG_ECHO: &str = "framewire.echo";

/// Thread-safe diagnostic log shared by a bus and its transport.
#[derive(Debug)]
pub struct DiagnosticLog {
    history: RwLock<VecDeque<Diagnostic>>,
    capacity: usize,
}

impl DiagnosticLog {
    /// Create a log with the default history size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DIAGNOSTIC_HISTORY)
    }

    /// Create a log retaining at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn debug(&self, tag: &str, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Debug, tag, message));
    }

    pub fn info(&self, tag: &str, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Info, tag, message));
    }

    pub fn warning(&self, tag: &str, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Warning, tag, message));
    }

    pub fn error(&self, tag: &str, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Error, tag, message));
    }

    /// Emit a diagnostic through `tracing` and store it in the history.
    pub fn record(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Debug => debug!(tag = %diagnostic.tag, "{}", diagnostic.message),
            Severity::Info => info!(tag = %diagnostic.tag, "{}", diagnostic.message),
            Severity::Warning => warn!(tag = %diagnostic.tag, "{}", diagnostic.message),
            Severity::Error => error!(tag = %diagnostic.tag, "{}", diagnostic.message),
        }

        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(diagnostic);
    }

    /// Most recent diagnostics, newest first.
    pub fn history(&self, limit: usize) -> Vec<Diagnostic> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// The most recent diagnostic, if any.
    pub fn last(&self) -> Option<Diagnostic> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history.back().cloned()
    }

    /// Number of retained diagnostics at the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history.iter().filter(|d| d.severity == severity).count()
    }

    /// Retained diagnostics whose message contains `needle`.
    pub fn find(&self, needle: &str) -> Vec<Diagnostic> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        history
            .iter()
            .filter(|d| d.message.contains(needle))
            .cloned()
            .collect()
    }

    /// Maximum number of retained diagnostics.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_history() {
        let log = DiagnosticLog::new();
        log.info(TAG_BUS, "first");
        log.error(TAG_TRANSPORT, "second");

        let history = log.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "second");
        assert_eq!(history[1].tag, TAG_BUS);
        assert_eq!(log.count(Severity::Error), 1);
        assert_eq!(log.last().unwrap().message, "second");
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let log = DiagnosticLog::with_capacity(2);
        log.debug(TAG_BUS, "a");
        log.debug(TAG_BUS, "b");
        log.debug(TAG_BUS, "c");

        let messages: Vec<_> = log.history(10).into_iter().map(|d| d.message).collect();
        assert_eq!(messages, vec!["c", "b"]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let log = DiagnosticLog::with_capacity(0);
        assert_eq!(log.capacity(), 1);
        log.warning(TAG_ECHO, "kept");
        assert_eq!(log.find("kept").len(), 1);
    }
}
