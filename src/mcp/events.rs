use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Maximum retained entries per server; the oldest entry is evicted first.
pub const MAX_ENTRIES_PER_SERVER: usize = 200;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
    pub raw: Option<Value>,
    pub is_error: bool,
}

/// Bounded, per-server append-only log of significant events.
///
/// Shared by the negotiator and the registry through an `Arc`; appends are
/// fire-and-forget and never block async callers.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<HashMap<String, VecDeque<LogEntry>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, server: &str, message: impl Into<String>, raw: Option<Value>, is_error: bool) {
        let entry = LogEntry {
            at: Utc::now(),
            message: message.into(),
            raw,
            is_error,
        };
        let mut entries = self.entries.lock().expect("event log lock poisoned");
        let log = entries.entry(server.to_ascii_lowercase()).or_default();
        if log.len() >= MAX_ENTRIES_PER_SERVER {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Returns the retained entries for a server, newest first.
    pub fn read(&self, server: &str) -> Vec<LogEntry> {
        let entries = self.entries.lock().expect("event log lock poisoned");
        entries
            .get(&server.to_ascii_lowercase())
            .map(|log| log.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, server: &str) {
        let mut entries = self.entries.lock().expect("event log lock poisoned");
        entries.remove(&server.to_ascii_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_returns_newest_first() {
        let log = EventLog::new();
        log.append("alpha", "first", None, false);
        log.append("alpha", "second", None, true);

        let entries = log.read("alpha");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "second");
        assert!(entries[0].is_error);
        assert_eq!(entries[1].message, "first");
    }

    #[test]
    fn eviction_is_fifo() {
        let log = EventLog::new();
        for index in 0..(MAX_ENTRIES_PER_SERVER + 3) {
            log.append("alpha", format!("entry-{index}"), None, false);
        }

        let entries = log.read("alpha");
        assert_eq!(entries.len(), MAX_ENTRIES_PER_SERVER);
        assert_eq!(
            entries.last().map(|entry| entry.message.as_str()),
            Some("entry-3")
        );
    }

    #[test]
    fn servers_are_isolated_and_clearable() {
        let log = EventLog::new();
        log.append("alpha", "a", None, false);
        log.append("beta", "b", None, false);

        log.clear("Alpha");
        assert!(log.read("alpha").is_empty());
        assert_eq!(log.read("beta").len(), 1);
    }
}
