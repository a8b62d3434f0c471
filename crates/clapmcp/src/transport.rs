//! Transports that carry an [`McpServer`] to its clients.
//!
//! - [`StdioTransport`]: one session over stdin/stdout, with the traffic
//!   mirrored to stderr.
//! - [`HttpTransport`]: streamable HTTP at `/mcp`, one session per client.

use crate::error::{ServeError, ServeResult};
use crate::mirror::{LogForwarder, Mirror};
use crate::server::McpServer;
use async_trait::async_trait;
use axum::Router;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{
    SessionId, SessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use std::future::{Future, IntoFuture};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Path the HTTP transport serves the protocol on.
pub const MCP_PATH: &str = "/mcp";

/// How long open HTTP connections may drain after a shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Something that can run a server until its clients go away.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Serve `server` until the transport closes.
    async fn serve(&self, server: McpServer) -> ServeResult<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Serves a single session over the process's stdin and stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioTransport;

#[async_trait]
impl Transport for StdioTransport {
    async fn serve(&self, server: McpServer) -> ServeResult<()> {
        let stderr = LogForwarder::stderr();
        let transport = (
            Mirror::new(tokio::io::stdin(), "read", stderr.clone()),
            Mirror::new(tokio::io::stdout(), "write", stderr),
        );

        let session = server.session();
        let running = session
            .clone()
            .serve(transport)
            .await
            .map_err(ServeError::transport)?;
        info!("stdio session started");

        let cancel = running.cancellation_token();
        let waiting = running.waiting();
        tokio::pin!(waiting);
        let reason = tokio::select! {
            reason = &mut waiting => reason,
            () = session.keep_alive_failed() => {
                cancel.cancel();
                waiting.await
            }
        }
        .map_err(ServeError::transport)?;
        info!(reason = ?reason, "stdio session ended");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Serves streamable HTTP on all interfaces.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    port: u16,
    keep_alive: Duration,
}

impl HttpTransport {
    pub fn new(port: u16, keep_alive: Duration) -> Self {
        Self { port, keep_alive }
    }

    /// Address clients use to reach the endpoint.
    pub fn url(&self) -> String {
        format!("http://localhost:{}{}", self.port, MCP_PATH)
    }

    /// Build the router without binding, for embedding or tests.
    pub fn router(&self, server: McpServer) -> Router {
        self.router_with(server, Arc::new(LocalSessionManager::default()))
    }

    fn router_with(&self, server: McpServer, sessions: Arc<LocalSessionManager>) -> Router {
        let config = StreamableHttpServerConfig {
            sse_keep_alive: (!self.keep_alive.is_zero()).then_some(self.keep_alive),
            ..Default::default()
        };
        let service = StreamableHttpService::new(move || Ok(server.session()), sessions, config);

        Router::new()
            .nest_service(MCP_PATH, service)
            .layer(TraceLayer::new_for_http())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn serve(&self, server: McpServer) -> ServeResult<()> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        info!(url = %self.url(), "http server configuration");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServeError::Bind { addr, source })?;

        let sessions = Arc::new(LocalSessionManager::default());
        let router = self.router_with(server, Arc::clone(&sessions));
        serve_until(
            listener,
            router,
            shutdown_signal(),
            close_sessions(sessions),
            SHUTDOWN_GRACE,
        )
        .await?;

        info!("http server stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Serve `router` until `signal` fires.
///
/// After the signal the listener stops accepting, `on_signal` runs, and open
/// connections get `grace` to finish. Long-lived streams still open after
/// that are dropped, so the call returns even while a client holds an SSE
/// stream.
async fn serve_until<S, C>(
    listener: TcpListener,
    router: Router,
    signal: S,
    on_signal: C,
    grace: Duration,
) -> ServeResult<()>
where
    S: Future<Output = ()> + Send + 'static,
    C: Future<Output = ()> + Send,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result.map_err(ServeError::from),
        () = signal => {}
    }

    info!("shutdown requested");
    let _ = stop_tx.send(());
    on_signal.await;
    match tokio::time::timeout(grace, server).await {
        Ok(result) => result?,
        Err(_) => warn!(grace = ?grace, "connections still open after shutdown grace, dropping them"),
    }
    Ok(())
}

/// Close every live streamable HTTP session so their streams end.
async fn close_sessions(sessions: Arc<LocalSessionManager>) {
    let ids: Vec<SessionId> = sessions.sessions.read().await.keys().cloned().collect();
    for id in ids {
        if let Err(e) = sessions.close_session(&id).await {
            debug!(session = %id, error = %e, "failed to close session");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
