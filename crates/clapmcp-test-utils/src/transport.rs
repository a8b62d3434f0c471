//! A fake transport.

use async_trait::async_trait;
use clapmcp::{McpServer, Mode, ServeError, ServeResult, Transport};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One request to serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeCall {
    pub mode: Mode,
    pub port: u16,
    pub keep_alive: Duration,
    /// Name of the server that was handed to the transport.
    pub server_name: String,
}

/// Records serve requests instead of opening stdio or a socket.
///
/// Use [`FakeTransport::factory`] as the `connect` argument of
/// `McpCommand::run_with`.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    serves: Arc<Mutex<Vec<ServeCall>>>,
    failure: Option<String>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every serve fail with a transport error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Serve requests recorded so far.
    pub fn serves(&self) -> Vec<ServeCall> {
        self.serves.lock().unwrap().clone()
    }

    /// A transport factory bound to this fake.
    pub fn factory(&self) -> impl FnOnce(Mode, u16, Duration) -> Box<dyn Transport> {
        let fake = self.clone();
        move |mode, port, keep_alive| -> Box<dyn Transport> {
            Box::new(Bound {
                fake,
                mode,
                port,
                keep_alive,
            })
        }
    }
}

struct Bound {
    fake: FakeTransport,
    mode: Mode,
    port: u16,
    keep_alive: Duration,
}

#[async_trait]
impl Transport for Bound {
    async fn serve(&self, server: McpServer) -> ServeResult<()> {
        self.fake.serves.lock().unwrap().push(ServeCall {
            mode: self.mode,
            port: self.port,
            keep_alive: self.keep_alive,
            server_name: server.name().to_string(),
        });
        match &self.fake.failure {
            Some(message) => Err(ServeError::transport(message)),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
