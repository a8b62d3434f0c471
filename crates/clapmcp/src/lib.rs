//! Expose a clap command tree as a Model Context Protocol server.
//!
//! This crate provides:
//! - A preconfigured [`McpServer`] with tool and resource registries
//! - An `mcp` subcommand ([`McpCommand`], [`McpArgs`]) that serves it over
//!   stdio or streamable HTTP
//! - [`tool_handler`] and [`resource_handler`], which wrap plain CLI
//!   operations into handlers that log to both the client session and the
//!   process
//!
//! The protocol itself is implemented by `rmcp`.
//!
//! ```no_run
//! use clapmcp::{server_and_command, Config, McpArgs};
//!
//! # async fn run(args: McpArgs) {
//! let (server, command) = server_and_command(Config::new("myapp", "0.1.0"));
//! // register tools on `server` ...
//! # let _ = server;
//! command.execute(&args).await;
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod mirror;
pub mod page;
pub mod server;
pub mod transport;

pub use command::{server_and_command, McpArgs, McpCommand, Mode};
pub use config::{
    Capabilities, Config, ResourceCapabilities, ServerOptions, ToolCapabilities,
    DEFAULT_KEEP_ALIVE, DEFAULT_PAGE_SIZE, DEFAULT_PORT,
};
pub use error::{HandlerError, ServeError, ServeResult};
pub use handler::{
    input_encode_failures, resource_handler, tool_handler, GeneratedResource, GeneratedTool,
    ResourceHandler, ResourceRequest, ToolHandler,
};
pub use logging::{Level, LogEntry, LogSink, NoopNotifier, SessionNotifier, TracingSink};
pub use server::McpServer;
pub use transport::{HttpTransport, StdioTransport, Transport};

/// Re-exported protocol types used in the public API.
pub use rmcp::model::{CallToolResult, ReadResourceResult, Resource, Tool};
