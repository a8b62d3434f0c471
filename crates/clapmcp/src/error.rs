//! Error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Result type for starting and running the server.
pub type ServeResult<T> = Result<T, ServeError>;

/// Errors that stop the `mcp` command. All of them are fatal for the process.
#[derive(Debug, Error)]
pub enum ServeError {
    /// `--mode` was neither `stdio` nor `http`.
    #[error("invalid mode: {0} (valid modes: stdio, http)")]
    InvalidMode(String),

    /// The HTTP listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The protocol service failed to start or stopped abnormally.
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServeError {
    /// Create a transport error.
    pub fn transport(message: impl std::fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }
}

/// Errors returned by generated tool and resource handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request arguments did not decode into the handler's input type.
    #[error("invalid input: {0}")]
    InvalidInput(#[from] serde_json::Error),

    /// The wrapped operation failed. Displays the operation's own message.
    #[error("{0}")]
    Operation(anyhow::Error),

    /// The wrapped operation panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Whether this error came from the wrapped operation itself.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_) | Self::Panicked(_))
    }
}
