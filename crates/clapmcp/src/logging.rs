//! Dual-sink logging for generated handlers.
//!
//! Every handler invocation produces one [`LogEntry`] which is written to a
//! list of sinks: the calling client's session (as MCP log notifications) and
//! the process-wide `tracing` subscriber.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Minimum interval between two session notifications carrying the same message.
pub const SESSION_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }
}

/// What kind of handler produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Tool,
    Resource,
}

/// A single structured log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub kind: HandlerKind,
    /// Tool or resource name.
    pub name: String,
    pub message: String,
    /// Serialized tool input.
    pub input: Option<String>,
    /// Requested resource URI.
    pub uri: Option<String>,
    /// Length in bytes of the produced output.
    pub output_length: Option<usize>,
}

impl LogEntry {
    pub fn new(
        level: Level,
        kind: HandlerKind,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            kind,
            name: name.into(),
            message: message.into(),
            input: None,
            uri: None,
            output_length: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_output_length(mut self, len: usize) -> Self {
        self.output_length = Some(len);
        self
    }

    /// Payload sent to the client in a log notification.
    ///
    /// The handler name is not included; the session logger carries it as
    /// the logger name.
    pub fn data(&self) -> Value {
        let mut data = Map::new();
        data.insert("msg".to_string(), json!(self.message));
        if let Some(input) = &self.input {
            data.insert("input".to_string(), json!(input));
        }
        if let Some(uri) = &self.uri {
            data.insert("uri".to_string(), json!(uri));
        }
        if let Some(len) = self.output_length {
            data.insert("output_length".to_string(), json!(len));
        }
        Value::Object(data)
    }
}

/// Destination for handler log entries.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log(&self, entry: &LogEntry);
}

/// Write an entry to every sink, in order.
pub async fn log_to_all(sinks: &[&dyn LogSink], entry: &LogEntry) {
    for sink in sinks {
        sink.log(entry).await;
    }
}

/// Process-wide sink backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

macro_rules! emit {
    ($level:ident, $entry:expr) => {{
        let entry = $entry;
        let input = entry.input.as_deref();
        let uri = entry.uri.as_deref();
        let output_length = entry.output_length;
        match entry.kind {
            HandlerKind::Tool => tracing::$level!(
                tool = %entry.name,
                input,
                uri,
                output_length,
                "{}",
                entry.message
            ),
            HandlerKind::Resource => tracing::$level!(
                resource = %entry.name,
                input,
                uri,
                output_length,
                "{}",
                entry.message
            ),
        }
    }};
}

#[async_trait]
impl LogSink for TracingSink {
    async fn log(&self, entry: &LogEntry) {
        match entry.level {
            Level::Debug => emit!(debug, entry),
            Level::Info => emit!(info, entry),
            Level::Warning => emit!(warn, entry),
            Level::Error => emit!(error, entry),
        }
    }
}

/// Delivers log messages to the client of one session.
///
/// Implementations decide whether the client wants the message at all
/// (e.g. based on the level it requested with `logging/setLevel`).
#[async_trait]
pub trait SessionNotifier: Send + Sync {
    async fn notify(&self, level: Level, logger: &str, data: Value);
}

/// Notifier for invocations that have no client session attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl SessionNotifier for NoopNotifier {
    async fn notify(&self, _level: Level, _logger: &str, _data: Value) {}
}

/// Session-scoped logger labeled with a handler name.
///
/// Identical messages are sent at most once per `min_interval`.
pub struct SessionLogger {
    name: String,
    notifier: Arc<dyn SessionNotifier>,
    throttle: Throttle,
}

impl SessionLogger {
    pub fn new(
        name: impl Into<String>,
        notifier: Arc<dyn SessionNotifier>,
        min_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            notifier,
            throttle: Throttle::new(min_interval),
        }
    }
}

#[async_trait]
impl LogSink for SessionLogger {
    async fn log(&self, entry: &LogEntry) {
        if !self.throttle.admit(&entry.message) {
            tracing::debug!(logger = %self.name, "session log throttled");
            return;
        }
        self.notifier
            .notify(entry.level, &self.name, entry.data())
            .await;
    }
}

/// Per-key rate limiter.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if `key` may be emitted now, and records the emission.
    pub fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match last.get(key) {
            Some(prev) if now.duration_since(*prev) < self.min_interval => false,
            _ => {
                last.insert(key.to_string(), now);
                true
            }
        }
    }
}
