//! Recording log sinks.

use async_trait::async_trait;
use clapmcp::logging::{Level, LogEntry, LogSink, SessionNotifier};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// A `LogSink` that keeps every entry it receives.
///
/// Clones share the same record, so one clone can be handed to a handler
/// while the test keeps another for inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries logged so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of entries logged so far.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries at `level`.
    pub fn at_level(&self, level: Level) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.level == level)
            .collect()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

/// A message delivered to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub level: Level,
    pub logger: String,
    pub data: Value,
}

/// A `SessionNotifier` that keeps every message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionNotifier for RecordingNotifier {
    async fn notify(&self, level: Level, logger: &str, data: Value) {
        self.sent.lock().unwrap().push(SentMessage {
            level,
            logger: logger.to_string(),
            data,
        });
    }
}
