//! Testing utilities, fakes, and log capture for clapmcp.
//!
//! - **Sinks**: recording implementations of `LogSink` and `SessionNotifier`
//! - **Transport**: a fake `Transport` that records what it was asked to serve
//! - **Logs**: capture of `tracing` output for assertions on log lines
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use clapmcp_test_utils::{FakeTransport, LogCapture};
//!
//! #[tokio::test]
//! async fn test_startup_logs() {
//!     let logs = LogCapture::new();
//!     let _guard = logs.set_default();
//!     let transport = FakeTransport::new();
//!
//!     command.run_with(&args, transport.factory()).await.unwrap();
//!
//!     assert!(logs.contains("starting MCP server"));
//!     assert_eq!(transport.serves().len(), 1);
//! }
//! ```

pub mod logs;
pub mod sinks;
pub mod transport;

pub use logs::LogCapture;
pub use sinks::{RecordingNotifier, RecordingSink, SentMessage};
pub use transport::{FakeTransport, ServeCall};
