//! Generators that turn plain CLI operations into MCP handlers.
//!
//! An operation is any function of the shape
//! `Fn(input, &mut dyn Write) -> anyhow::Result<()>`, the same shape a CLI
//! command uses to print to stdout. The generated handler decodes the request,
//! runs the operation on the blocking pool with an in-memory buffer as its
//! output, logs the outcome to the session and process loggers, and returns
//! the buffer as the result.
//!
//! ```no_run
//! use clapmcp::{tool_handler, Config};
//! use serde::{Deserialize, Serialize};
//! use std::io::Write;
//!
//! #[derive(Deserialize, Serialize, schemars::JsonSchema)]
//! struct Greet {
//!     name: String,
//! }
//!
//! let (server, _command) = clapmcp::server_and_command(Config::new("greeter", "0.1.0"));
//! server.add_tool(
//!     clapmcp::McpServer::tool_for::<Greet>("greet", "Say hello"),
//!     tool_handler("greet", |input: Greet, out| {
//!         writeln!(out, "hello {}", input.name)?;
//!         Ok(())
//!     }),
//! );
//! ```

use crate::error::HandlerError;
use crate::logging::{
    log_to_all, HandlerKind, Level, LogEntry, LogSink, SessionLogger, SessionNotifier,
    TracingSink, SESSION_LOG_INTERVAL,
};
use async_trait::async_trait;
use rmcp::model::{CallToolResult, Content, ReadResourceResult, ResourceContents};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static INPUT_ENCODE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Number of times a tool input could not be serialized for logging.
///
/// Such failures never change the outcome of the call; the log entry simply
/// carries an empty `input`.
pub fn input_encode_failures() -> u64 {
    INPUT_ENCODE_FAILURES.load(Ordering::Relaxed)
}

/// A tool invocation handler.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        arguments: Value,
        session: Arc<dyn SessionNotifier>,
    ) -> Result<CallToolResult, HandlerError>;
}

/// A resource read handler.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(
        &self,
        request: ResourceRequest,
        session: Arc<dyn SessionNotifier>,
    ) -> Result<ReadResourceResult, HandlerError>;
}

/// A resource read request as seen by a resource operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub uri: String,
}

impl ResourceRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Wrap `op` as a tool handler named `name`.
///
/// The tool's JSON arguments are decoded into `T`. On success the bytes
/// written by `op` become a single text content item.
pub fn tool_handler<T, F>(name: impl Into<String>, op: F) -> GeneratedTool<T, F>
where
    T: DeserializeOwned + Serialize + Send + 'static,
    F: Fn(T, &mut dyn Write) -> anyhow::Result<()> + Send + Sync + 'static,
{
    GeneratedTool {
        name: name.into(),
        op: Arc::new(op),
        process: Arc::new(TracingSink),
        min_interval: SESSION_LOG_INTERVAL,
        _input: PhantomData,
    }
}

/// Wrap `op` as a resource handler named `name` serving `mime_type`.
pub fn resource_handler<F>(
    name: impl Into<String>,
    mime_type: impl Into<String>,
    op: F,
) -> GeneratedResource<F>
where
    F: Fn(&ResourceRequest, &mut dyn Write) -> anyhow::Result<()> + Send + Sync + 'static,
{
    GeneratedResource {
        name: name.into(),
        mime_type: mime_type.into(),
        op: Arc::new(op),
        process: Arc::new(TracingSink),
        min_interval: SESSION_LOG_INTERVAL,
    }
}

/// Handler produced by [`tool_handler`].
pub struct GeneratedTool<T, F> {
    name: String,
    op: Arc<F>,
    process: Arc<dyn LogSink>,
    min_interval: Duration,
    _input: PhantomData<fn(T)>,
}

impl<T, F> GeneratedTool<T, F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the process-wide sink (defaults to [`TracingSink`]).
    pub fn with_process_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.process = sink;
        self
    }

    /// Change the session log throttle interval.
    pub fn with_session_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

#[async_trait]
impl<T, F> ToolHandler for GeneratedTool<T, F>
where
    T: DeserializeOwned + Serialize + Send + 'static,
    F: Fn(T, &mut dyn Write) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn call(
        &self,
        arguments: Value,
        session: Arc<dyn SessionNotifier>,
    ) -> Result<CallToolResult, HandlerError> {
        let session_log = SessionLogger::new(self.name.as_str(), session, self.min_interval);
        let sinks: [&dyn LogSink; 2] = [&session_log, self.process.as_ref()];

        let input: T = match serde_json::from_value(arguments.clone()) {
            Ok(input) => input,
            Err(e) => {
                let err = HandlerError::InvalidInput(e);
                let entry =
                    LogEntry::new(Level::Error, HandlerKind::Tool, &self.name, err.to_string())
                        .with_input(arguments.to_string());
                log_to_all(&sinks, &entry).await;
                return Err(err);
            }
        };
        let input_json = encode_input(&self.name, &input);

        let op = Arc::clone(&self.op);
        let outcome = run_blocking(move |out| (*op)(input, out)).await;

        match outcome {
            Ok(output) => {
                let entry = LogEntry::new(Level::Info, HandlerKind::Tool, &self.name, &self.name)
                    .with_input(input_json)
                    .with_output_length(output.len());
                log_to_all(&sinks, &entry).await;

                let text = String::from_utf8_lossy(&output).into_owned();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(err) => {
                let entry =
                    LogEntry::new(Level::Error, HandlerKind::Tool, &self.name, err.to_string())
                        .with_input(input_json);
                log_to_all(&sinks, &entry).await;
                Err(err)
            }
        }
    }
}

/// Handler produced by [`resource_handler`].
pub struct GeneratedResource<F> {
    name: String,
    mime_type: String,
    op: Arc<F>,
    process: Arc<dyn LogSink>,
    min_interval: Duration,
}

impl<F> GeneratedResource<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Replace the process-wide sink (defaults to [`TracingSink`]).
    pub fn with_process_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.process = sink;
        self
    }

    /// Change the session log throttle interval.
    pub fn with_session_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

#[async_trait]
impl<F> ResourceHandler for GeneratedResource<F>
where
    F: Fn(&ResourceRequest, &mut dyn Write) -> anyhow::Result<()> + Send + Sync + 'static,
{
    async fn read(
        &self,
        request: ResourceRequest,
        session: Arc<dyn SessionNotifier>,
    ) -> Result<ReadResourceResult, HandlerError> {
        let session_log = SessionLogger::new(self.name.as_str(), session, self.min_interval);
        let sinks: [&dyn LogSink; 2] = [&session_log, self.process.as_ref()];
        let uri = request.uri.clone();

        let op = Arc::clone(&self.op);
        let outcome = run_blocking(move |out| (*op)(&request, out)).await;

        match outcome {
            Ok(output) => {
                let entry =
                    LogEntry::new(Level::Info, HandlerKind::Resource, &self.name, "resource read")
                        .with_uri(uri.as_str())
                        .with_output_length(output.len());
                log_to_all(&sinks, &entry).await;

                let text = String::from_utf8_lossy(&output).into_owned();
                let mut contents = ResourceContents::text(text, uri);
                if let ResourceContents::TextResourceContents { mime_type, .. } = &mut contents {
                    *mime_type = Some(self.mime_type.clone());
                }
                Ok(ReadResourceResult {
                    contents: vec![contents],
                })
            }
            Err(err) => {
                let entry =
                    LogEntry::new(Level::Error, HandlerKind::Resource, &self.name, err.to_string())
                        .with_uri(uri);
                log_to_all(&sinks, &entry).await;
                Err(err)
            }
        }
    }
}

/// Serialize a tool input for logging. Failures yield an empty string.
fn encode_input<T: Serialize>(name: &str, input: &T) -> String {
    match serde_json::to_string(input) {
        Ok(json) => json,
        Err(e) => {
            INPUT_ENCODE_FAILURES.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(tool = %name, error = %e, "could not encode tool input for logging");
            String::new()
        }
    }
}

/// Run an operation on the blocking pool with a fresh output buffer.
async fn run_blocking<F>(op: F) -> Result<Vec<u8>, HandlerError>
where
    F: FnOnce(&mut dyn Write) -> anyhow::Result<()> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(move || {
        let mut buffer = Vec::new();
        op(&mut buffer).map(|()| buffer)
    })
    .await;

    match joined {
        Ok(Ok(buffer)) => Ok(buffer),
        Ok(Err(e)) => Err(HandlerError::Operation(e)),
        Err(e) => Err(HandlerError::Panicked(e.to_string())),
    }
}
