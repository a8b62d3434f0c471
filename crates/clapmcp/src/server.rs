//! The MCP server handle.
//!
//! [`McpServer`] owns the tool and resource registries and implements
//! `rmcp::ServerHandler` on top of them. Protocol framing, initialization and
//! request routing are done by `rmcp`; this module only answers the requests.
//!
//! The handle is cheap to clone. Each transport session works on its own view
//! obtained from [`McpServer::session`], which shares the registries but keeps
//! its own log level and subscription identity. When the last clone of a
//! session view goes away, its peer and subscriptions are dropped from the
//! shared state.
//!
//! With a nonzero keep-alive, every initialized session is pinged at that
//! interval. A session whose client stops answering is forgotten and
//! reported through [`McpServer::keep_alive_failed`].

use crate::config::{Capabilities, Config, ServerOptions};
use crate::error::HandlerError;
use crate::handler::{ResourceHandler, ResourceRequest, ToolHandler};
use crate::logging::{Level, NoopNotifier, SessionNotifier};
use crate::page::paginate;
use async_trait::async_trait;
use rmcp::model::{
    AnnotateAble, CallToolRequestParam, CallToolResult, Content, ErrorCode, Implementation,
    JsonObject, ListResourcesResult, ListToolsResult, LoggingLevel,
    LoggingMessageNotificationParam, PaginatedRequestParam, RawResource, ReadResourceRequestParam,
    PingRequest, ReadResourceResult, Resource, ResourceUpdatedNotificationParam,
    ResourcesCapability, ServerCapabilities, ServerInfo, ServerRequest, SetLevelRequestParam,
    SubscribeRequestParam, Tool, ToolsCapability, UnsubscribeRequestParam,
};
use rmcp::service::{NotificationContext, Peer, RequestContext};
use rmcp::{ErrorData, RoleServer, ServerHandler};
use schemars::JsonSchema;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A registered tool.
struct ToolEntry {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// A registered resource.
struct ResourceEntry {
    resource: Resource,
    handler: Arc<dyn ResourceHandler>,
}

/// State shared by every session of one server.
struct Shared {
    name: String,
    version: String,
    options: ServerOptions,
    tools: RwLock<BTreeMap<String, ToolEntry>>,
    resources: RwLock<BTreeMap<String, ResourceEntry>>,
    /// Sessions that have talked to us, by session id.
    peers: Mutex<HashMap<u64, Peer<RoleServer>>>,
    /// Resource URI -> subscribed session ids.
    subscriptions: Mutex<HashMap<String, HashSet<u64>>>,
    next_session: AtomicU64,
}

/// Per-session state.
struct SessionState {
    id: u64,
    shared: Weak<Shared>,
    /// Minimum severity requested via `logging/setLevel`. `None` until the
    /// client asks for log messages.
    log_level: Mutex<Option<u8>>,
    /// Signalled when the keep-alive loop gives up on the client.
    closed: Notify,
}

impl SessionState {
    fn new(id: u64, shared: &Arc<Shared>) -> Self {
        Self {
            id,
            shared: Arc::downgrade(shared),
            log_level: Mutex::new(None),
            closed: Notify::new(),
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            forget_session(&shared, self.id);
        }
    }
}

/// A liveness check against one connected client.
#[async_trait]
trait Ping: Send + Sync + 'static {
    /// Fails if the client does not answer within `timeout`.
    async fn ping(&self, timeout: Duration) -> Result<(), String>;
}

#[async_trait]
impl Ping for Peer<RoleServer> {
    async fn ping(&self, timeout: Duration) -> Result<(), String> {
        let request = ServerRequest::PingRequest(PingRequest::default());
        match tokio::time::timeout(timeout, self.send_request(request)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("no reply within {:?}", timeout)),
        }
    }
}

/// Which list changed.
#[derive(Debug, Clone, Copy)]
enum ListChange {
    Tools,
    Resources,
}

/// A configured MCP server.
#[derive(Clone)]
pub struct McpServer {
    shared: Arc<Shared>,
    session: Arc<SessionState>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.shared.name)
            .field("version", &self.shared.version)
            .field("session", &self.session.id)
            .finish()
    }
}

impl McpServer {
    /// Create a server from a configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_options(&config.name, &config.version, config.server_options())
    }

    /// Create a server with explicit options.
    pub fn with_options(
        name: impl Into<String>,
        version: impl Into<String>,
        options: ServerOptions,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: name.into(),
            version: version.into(),
            options,
            tools: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(BTreeMap::new()),
            peers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        });
        let session = Arc::new(SessionState::new(0, &shared));
        Self { shared, session }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn version(&self) -> &str {
        &self.shared.version
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    /// A fresh view for a new transport session.
    pub fn session(&self) -> McpServer {
        let id = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        McpServer {
            session: Arc::new(SessionState::new(id, &self.shared)),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Resolves once the keep-alive loop of this session has given up on
    /// its client.
    pub async fn keep_alive_failed(&self) {
        self.session.closed.notified().await;
    }

    /// Tool metadata whose input schema is derived from `T`.
    pub fn tool_for<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Tool {
        let schema = match serde_json::to_value(schemars::schema_for!(T)) {
            Ok(Value::Object(map)) => map,
            _ => {
                let mut map = JsonObject::new();
                map.insert("type".to_string(), Value::String("object".to_string()));
                map
            }
        };
        let name: String = name.into();
        let description: String = description.into();
        Tool::new(name, description, Arc::new(schema))
    }

    /// Resource metadata for a fixed URI.
    pub fn resource(
        uri: impl Into<String>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Resource {
        let mut raw = RawResource::new(uri, name);
        raw.mime_type = Some(mime_type.into());
        raw.no_annotation()
    }

    /// Register (or replace) a tool.
    pub fn add_tool(&self, tool: Tool, handler: impl ToolHandler + 'static) {
        let name = tool.name.to_string();
        write_lock(&self.shared.tools).insert(
            name.clone(),
            ToolEntry {
                tool,
                handler: Arc::new(handler),
            },
        );
        debug!(tool = %name, "tool registered");
        self.announce(ListChange::Tools);
    }

    /// Remove a tool. Returns whether it existed.
    pub fn remove_tool(&self, name: &str) -> bool {
        let removed = write_lock(&self.shared.tools).remove(name).is_some();
        if removed {
            self.announce(ListChange::Tools);
        }
        removed
    }

    /// Register (or replace) a resource, keyed by its URI.
    pub fn add_resource(&self, resource: Resource, handler: impl ResourceHandler + 'static) {
        let uri = resource.raw.uri.clone();
        write_lock(&self.shared.resources).insert(
            uri.clone(),
            ResourceEntry {
                resource,
                handler: Arc::new(handler),
            },
        );
        debug!(uri = %uri, "resource registered");
        self.announce(ListChange::Resources);
    }

    /// Remove a resource. Returns whether it existed.
    pub fn remove_resource(&self, uri: &str) -> bool {
        let removed = write_lock(&self.shared.resources).remove(uri).is_some();
        if removed {
            lock(&self.shared.subscriptions).remove(uri);
            self.announce(ListChange::Resources);
        }
        removed
    }

    /// Names of the registered tools, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        read_lock(&self.shared.tools).keys().cloned().collect()
    }

    /// URIs of the registered resources, sorted.
    pub fn resource_uris(&self) -> Vec<String> {
        read_lock(&self.shared.resources).keys().cloned().collect()
    }

    /// One page of the tool list.
    pub fn tools_page(&self, cursor: Option<&str>) -> Result<ListToolsResult, ErrorData> {
        let tools = read_lock(&self.shared.tools);
        let page = paginate(&tools, cursor, self.shared.options.page_size)
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))?;

        let mut result =
            ListToolsResult::with_all_items(page.items.into_iter().map(|e| e.tool.clone()).collect());
        result.next_cursor = page.next_cursor;
        Ok(result)
    }

    /// One page of the resource list.
    pub fn resources_page(&self, cursor: Option<&str>) -> Result<ListResourcesResult, ErrorData> {
        let resources = read_lock(&self.shared.resources);
        let page = paginate(&resources, cursor, self.shared.options.page_size)
            .map_err(|e| ErrorData::invalid_params(e.to_string(), None))?;

        let mut result = ListResourcesResult::with_all_items(
            page.items.into_iter().map(|e| e.resource.clone()).collect(),
        );
        result.next_cursor = page.next_cursor;
        Ok(result)
    }

    /// Invoke a tool by name.
    ///
    /// Operation failures are reported inside the result (`is_error`), so the
    /// client's model can see them. Unknown tools and undecodable arguments are
    /// protocol errors.
    pub async fn dispatch_tool(
        &self,
        name: &str,
        arguments: Value,
        session: Arc<dyn SessionNotifier>,
    ) -> Result<CallToolResult, ErrorData> {
        let handler = read_lock(&self.shared.tools)
            .get(name)
            .map(|entry| Arc::clone(&entry.handler));
        let Some(handler) = handler else {
            return Err(ErrorData::invalid_params(
                format!("tool not found: {}", name),
                None,
            ));
        };

        match handler.call(arguments, session).await {
            Ok(result) => Ok(result),
            Err(HandlerError::InvalidInput(e)) => Err(ErrorData::invalid_params(
                format!("invalid arguments for tool {}: {}", name, e),
                None,
            )),
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }

    /// Read a resource by URI.
    pub async fn dispatch_resource(
        &self,
        uri: &str,
        session: Arc<dyn SessionNotifier>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let handler = read_lock(&self.shared.resources)
            .get(uri)
            .map(|entry| Arc::clone(&entry.handler));
        let Some(handler) = handler else {
            return Err(ErrorData::resource_not_found(
                format!("resource not found: {}", uri),
                None,
            ));
        };

        handler
            .read(ResourceRequest::new(uri), session)
            .await
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))
    }

    /// Tell every session subscribed to `uri` that it changed.
    ///
    /// Returns the number of sessions notified.
    pub async fn notify_resource_updated(&self, uri: &str) -> usize {
        let targets: Vec<(u64, Peer<RoleServer>)> = {
            let subscriptions = lock(&self.shared.subscriptions);
            let Some(ids) = subscriptions.get(uri) else {
                return 0;
            };
            let peers = lock(&self.shared.peers);
            ids.iter()
                .filter_map(|id| peers.get(id).map(|peer| (*id, peer.clone())))
                .collect()
        };

        let mut notified = 0;
        for (id, peer) in targets {
            let param = ResourceUpdatedNotificationParam {
                uri: uri.to_string(),
            };
            match peer.notify_resource_updated(param).await {
                Ok(()) => notified += 1,
                Err(e) => {
                    debug!(session = id, error = %e, "dropping unreachable session");
                    forget_session(&self.shared, id);
                }
            }
        }
        notified
    }

    /// Whether the current session asked to be told about `uri`.
    pub fn is_subscribed(&self, uri: &str) -> bool {
        lock(&self.shared.subscriptions)
            .get(uri)
            .is_some_and(|ids| ids.contains(&self.session.id))
    }

    /// Record the current session's subscription to `uri`.
    pub fn subscribe_uri(&self, uri: &str) -> Result<(), ErrorData> {
        let subscribe = self
            .shared
            .options
            .capabilities
            .resources
            .is_some_and(|r| r.subscribe);
        if !subscribe {
            return Err(ErrorData::new(
                ErrorCode::METHOD_NOT_FOUND,
                "resource subscriptions are not supported",
                None,
            ));
        }
        if !read_lock(&self.shared.resources).contains_key(uri) {
            return Err(ErrorData::resource_not_found(
                format!("resource not found: {}", uri),
                None,
            ));
        }
        lock(&self.shared.subscriptions)
            .entry(uri.to_string())
            .or_default()
            .insert(self.session.id);
        Ok(())
    }

    /// Drop the current session's subscription to `uri`.
    pub fn unsubscribe_uri(&self, uri: &str) {
        let mut subscriptions = lock(&self.shared.subscriptions);
        if let Some(ids) = subscriptions.get_mut(uri) {
            ids.remove(&self.session.id);
            if ids.is_empty() {
                subscriptions.remove(uri);
            }
        }
    }

    /// Set the minimum level of log messages sent to the current session.
    pub fn set_log_level(&self, level: &LoggingLevel) {
        *lock(&self.session.log_level) = Some(severity(level));
    }

    /// The notifier used for handler logs in the current session.
    fn notifier(&self, peer: &Peer<RoleServer>) -> Arc<dyn SessionNotifier> {
        match *lock(&self.session.log_level) {
            Some(min_severity) => Arc::new(PeerNotifier {
                peer: peer.clone(),
                min_severity,
            }),
            None => Arc::new(NoopNotifier),
        }
    }

    /// Remember the peer of the current session for later notifications.
    fn track(&self, peer: &Peer<RoleServer>) {
        lock(&self.shared.peers)
            .entry(self.session.id)
            .or_insert_with(|| peer.clone());
    }

    /// Start pinging the client of the current session.
    ///
    /// Returns `None` when the keep-alive interval is zero.
    fn start_keep_alive(&self, pinger: impl Ping) -> Option<JoinHandle<()>> {
        let interval = self.shared.options.keep_alive;
        if interval.is_zero() {
            return None;
        }
        let session = Arc::downgrade(&self.session);
        Some(tokio::spawn(keep_alive(session, pinger, interval)))
    }

    /// Send a list-changed notification to every known session.
    fn announce(&self, change: ListChange) {
        let caps = &self.shared.options.capabilities;
        let enabled = match change {
            ListChange::Tools => caps.tools.is_some_and(|t| t.list_changed),
            ListChange::Resources => caps.resources.is_some_and(|r| r.list_changed),
        };
        if !enabled {
            return;
        }

        let peers: Vec<(u64, Peer<RoleServer>)> = lock(&self.shared.peers)
            .iter()
            .map(|(id, peer)| (*id, peer.clone()))
            .collect();
        if peers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let shared = Arc::clone(&self.shared);
        runtime.spawn(async move {
            for (id, peer) in peers {
                let sent = match change {
                    ListChange::Tools => peer.notify_tool_list_changed().await,
                    ListChange::Resources => peer.notify_resource_list_changed().await,
                };
                if let Err(e) = sent {
                    debug!(session = id, error = %e, ?change, "dropping unreachable session");
                    forget_session(&shared, id);
                }
            }
        });
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        let options = &self.shared.options;
        let mut implementation = Implementation::from_build_env();
        implementation.name = self.shared.name.clone();
        implementation.version = self.shared.version.clone();

        ServerInfo {
            instructions: (!options.instructions.is_empty()).then(|| options.instructions.clone()),
            capabilities: server_capabilities(&options.capabilities),
            server_info: implementation,
            ..Default::default()
        }
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        self.track(&context.peer);
        let pinging = self.start_keep_alive(context.peer).is_some();
        info!(session = self.session.id, keep_alive = pinging, "client initialized");
    }

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        self.track(&context.peer);
        let cursor = request.and_then(|r| r.cursor);
        self.tools_page(cursor.as_deref())
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.track(&context.peer);
        let arguments = Value::Object(request.arguments.unwrap_or_default());
        let notifier = self.notifier(&context.peer);
        self.dispatch_tool(request.name.as_ref(), arguments, notifier)
            .await
    }

    async fn list_resources(
        &self,
        request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        self.track(&context.peer);
        let cursor = request.and_then(|r| r.cursor);
        self.resources_page(cursor.as_deref())
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        self.track(&context.peer);
        let notifier = self.notifier(&context.peer);
        self.dispatch_resource(&request.uri, notifier).await
    }

    async fn subscribe(
        &self,
        request: SubscribeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<(), ErrorData> {
        self.track(&context.peer);
        self.subscribe_uri(&request.uri)?;
        info!(uri = %request.uri, session = self.session.id, "resource subscribed");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        request: UnsubscribeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<(), ErrorData> {
        self.track(&context.peer);
        self.unsubscribe_uri(&request.uri);
        Ok(())
    }

    async fn set_level(
        &self,
        request: SetLevelRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<(), ErrorData> {
        self.track(&context.peer);
        self.set_log_level(&request.level);
        debug!(session = self.session.id, level = ?request.level, "log level set");
        Ok(())
    }
}

/// Sends handler logs to one client as `notifications/message`.
struct PeerNotifier {
    peer: Peer<RoleServer>,
    min_severity: u8,
}

#[async_trait]
impl SessionNotifier for PeerNotifier {
    async fn notify(&self, level: Level, logger: &str, data: Value) {
        let level = logging_level(level);
        if severity(&level) < self.min_severity {
            return;
        }
        let param = LoggingMessageNotificationParam {
            level,
            logger: Some(logger.to_string()),
            data,
        };
        if let Err(e) = self.peer.notify_logging_message(param).await {
            debug!(logger = %logger, error = %e, "failed to send log notification");
        }
    }
}

fn server_capabilities(caps: &Capabilities) -> ServerCapabilities {
    let mut out = ServerCapabilities::default();
    if caps.logging {
        out.logging = Some(JsonObject::new());
    }
    out.resources = caps.resources.map(|r| ResourcesCapability {
        subscribe: Some(r.subscribe),
        list_changed: Some(r.list_changed),
    });
    out.tools = caps.tools.map(|t| ToolsCapability {
        list_changed: Some(t.list_changed),
    });
    out
}

fn logging_level(level: Level) -> LoggingLevel {
    match level {
        Level::Debug => LoggingLevel::Debug,
        Level::Info => LoggingLevel::Info,
        Level::Warning => LoggingLevel::Warning,
        Level::Error => LoggingLevel::Error,
    }
}

/// RFC 5424 severity order, lowest first.
fn severity(level: &LoggingLevel) -> u8 {
    match level {
        LoggingLevel::Debug => 0,
        LoggingLevel::Info => 1,
        LoggingLevel::Notice => 2,
        LoggingLevel::Warning => 3,
        LoggingLevel::Error => 4,
        LoggingLevel::Critical => 5,
        LoggingLevel::Alert => 6,
        LoggingLevel::Emergency => 7,
    }
}

/// Ping until the session is gone or its client stops answering.
async fn keep_alive(session: Weak<SessionState>, pinger: impl Ping, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(state) = session.upgrade() else {
            return;
        };
        if let Err(reason) = pinger.ping(interval).await {
            warn!(session = state.id, reason = %reason, "keep-alive ping failed, closing session");
            if let Some(shared) = state.shared.upgrade() {
                forget_session(&shared, state.id);
            }
            state.closed.notify_one();
            return;
        }
    }
}

fn forget_session(shared: &Shared, id: u64) {
    lock(&shared.peers).remove(&id);
    let mut subscriptions = lock(&shared.subscriptions);
    for ids in subscriptions.values_mut() {
        ids.remove(&id);
    }
    subscriptions.retain(|_, ids| !ids.is_empty());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
