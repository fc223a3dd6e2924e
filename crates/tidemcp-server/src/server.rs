//! Session manager: listener, admission, dispatch and lifecycle.
//!
//! ```text
//! Client connects (WebSocket upgrade, x-client-id header)
//!          │
//!          ▼
//! ┌─────────────────────────────────────┐
//! │ admit: sessions < max_connections?  │──no──► close 1008, emit Rejected
//! │        server not stopping?         │──no──► close 1000
//! └──────────────────┬──────────────────┘
//!                    │ yes
//!                    ▼
//! ┌─────────────────────────────────────┐
//! │ send `welcome`, emit Connection     │
//! └──────────────────┬──────────────────┘
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────┐
//! │ session loop (one task per session) │
//! │  ├─► request      → spawned dispatch│
//! │  ├─► notification → ServerEvent     │
//! │  ├─► malformed    → -32700 reply    │
//! │  ├─► after close  → dropped         │
//! │  └─► closed       → remove, emit    │
//! └─────────────────────────────────────┘
//! ```

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tidemcp_core::error::INTERNAL_ERROR;
use tidemcp_core::message::new_id;
use tidemcp_core::{
    ErrorObject, McpError, McpResult, Message, MessageType, PROTOCOL_VERSION, SessionInfo, Tool,
    WelcomeParams, close_codes, methods,
};
use tidemcp_transport::{CLIENT_ID_HEADER, Channel, CloseInfo, Inbound};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::{Authenticator, StaticAuthenticator};
use crate::config::ServerConfig;
use crate::events::{ServerEvent, ServerStats};
use crate::handler::{self, HandlerTable, request_handler};
use crate::heartbeat;
use crate::registry::{ToolRegistry, tool_handler};
use crate::session::{Refusal, Session, SessionTable, initial_permissions};

/// Capabilities advertised in `welcome` and in every context record
pub const CAPABILITIES: &[&str] = &["tools", "context"];

const EVENT_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// tidemcp server
///
/// Cheap to clone; clones share the same sessions, tools and listener.
///
/// ```rust,no_run
/// use serde_json::{Value, json};
/// use tidemcp_core::Tool;
/// use tidemcp_server::{McpServer, ServerConfig};
///
/// # async fn run() -> tidemcp_core::McpResult<()> {
/// let server = McpServer::new(ServerConfig::default().with_bind_address("127.0.0.1:0"));
/// server.register_tool(Tool::new("echo", "Echo input"), |input: Value| async move {
///     Ok(json!({ "echo": input["message"] }))
/// })?;
/// let addr = server.start().await?;
/// println!("listening on ws://{addr}");
/// server.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

#[derive(Debug)]
struct ServerInner {
    config: ServerConfig,
    sessions: Arc<SessionTable>,
    tools: Arc<ToolRegistry>,
    handlers: HandlerTable,
    events: broadcast::Sender<ServerEvent>,
    runtime: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    serve_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl McpServer {
    /// Create a server with the built-in handlers and the static authenticator
    pub fn new(config: ServerConfig) -> Self {
        let sessions = Arc::new(SessionTable::default());
        let tools = Arc::new(ToolRegistry::default());
        let handlers = HandlerTable::default();
        handler::install_builtins(
            &handlers,
            &sessions,
            &tools,
            Arc::new(StaticAuthenticator::new(&config.auth)),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(ServerInner {
                config,
                sessions,
                tools,
                handlers,
                events,
                runtime: Mutex::new(None),
            }),
        }
    }

    /// Replace the authenticator used by the built-in `authenticate` method
    #[must_use]
    pub fn with_authenticator(self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.inner
            .handlers
            .insert(methods::AUTHENTICATE, handler::authenticate(authenticator));
        self
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Bind the configured address and start accepting sessions
    ///
    /// # Errors
    ///
    /// See [`McpServer::start_at`].
    pub async fn start(&self) -> McpResult<SocketAddr> {
        let addr = self.inner.config.bind_address.clone();
        self.start_at(&addr).await
    }

    /// Bind `bind_address` and start accepting sessions
    ///
    /// Returns the bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the configuration is invalid or the
    /// server is already running, and a transport error if binding fails.
    pub async fn start_at(&self, bind_address: &str) -> McpResult<SocketAddr> {
        self.inner.config.validate()?;
        if self.is_running() {
            return Err(McpError::configuration("Server is already running"));
        }

        self.inner.sessions.reopen();
        let listener = tokio::net::TcpListener::bind(bind_address)
            .await
            .map_err(|e| McpError::transport(format!("Failed to bind {bind_address}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| McpError::transport(format!("Failed to read local address: {e}")))?;

        let app = Router::new()
            .route(&self.inner.config.path, get(websocket_handler))
            .with_state(Arc::clone(&self.inner));

        let shutdown = CancellationToken::new();
        let serve_shutdown = shutdown.clone();
        let serve_task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(serve_shutdown.cancelled_owned())
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Server error");
            }
        });
        let heartbeat_task = tokio::spawn(heartbeat::run(
            Arc::clone(&self.inner.sessions),
            self.inner.config.heartbeat_interval(),
            shutdown.clone(),
        ));

        let mut runtime = self.inner.runtime.lock();
        if runtime.is_some() {
            // Lost a race with a concurrent start().
            shutdown.cancel();
            serve_task.abort();
            heartbeat_task.abort();
            return Err(McpError::configuration("Server is already running"));
        }
        *runtime = Some(Running {
            local_addr,
            shutdown,
            serve_task,
            heartbeat_task,
        });
        drop(runtime);

        tracing::info!(
            server = %self.inner.config.name,
            version = %self.inner.config.version,
            %local_addr,
            path = %self.inner.config.path,
            "tidemcp server listening"
        );
        Ok(local_addr)
    }

    /// Close every session with 1000 and release the listener. Idempotent.
    ///
    /// Upgrades still in flight when `stop` is called are refused with the
    /// same close code instead of becoming sessions.
    pub async fn stop(&self) {
        let Some(running) = self.inner.runtime.lock().take() else {
            return;
        };

        let sessions = self.inner.sessions.close();
        tracing::info!(sessions = sessions.len(), "Stopping server");
        for session in sessions {
            session.close(close_codes::NORMAL, "Server shutting down");
        }

        running.shutdown.cancel();
        running.heartbeat_task.abort();
        let mut serve_task = running.serve_task;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut serve_task)
            .await
            .is_err()
        {
            tracing::warn!("Listener did not stop in time, aborting");
            serve_task.abort();
        }
        tracing::info!("Server stopped");
    }

    /// Whether the listener is running
    pub fn is_running(&self) -> bool {
        self.inner.runtime.lock().is_some()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.runtime.lock().as_ref().map(|r| r.local_addr)
    }

    /// Add or replace a tool
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the tool's input schema is invalid.
    pub fn register_tool<F, Fut>(&self, tool: Tool, handler: F) -> McpResult<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        self.inner.tools.register(tool, tool_handler(handler))
    }

    /// Remove a tool, returning whether it existed
    pub fn unregister_tool(&self, name: &str) -> bool {
        self.inner.tools.unregister(name)
    }

    /// Add or replace the handler for `method` (built-ins included)
    pub fn register_handler<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<Value>> + Send + 'static,
    {
        self.inner.handlers.insert(method, request_handler(handler));
    }

    /// Send a notification to every connected session
    ///
    /// Returns the number of sessions the notification was queued for.
    pub fn broadcast(&self, method: &str, params: Option<Value>) -> usize {
        let message = Message::notification(method, params);
        let delivered = self
            .inner
            .sessions
            .snapshot()
            .into_iter()
            .filter(|session| session.send(message.clone()).is_ok())
            .count();
        tracing::debug!(method, delivered, "Broadcast sent");
        delivered
    }

    /// Close one session and remove it from the session table
    ///
    /// Returns `false` if no such session exists.
    pub fn close_session(&self, session_id: &str, code: u16, reason: &str) -> bool {
        match self.inner.sessions.remove(session_id) {
            Some(session) => {
                session.close(code, reason);
                true
            }
            None => false,
        }
    }

    /// Look up a live session
    pub fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.sessions.get(session_id)
    }

    /// Summaries of every live session
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.inner
            .sessions
            .snapshot()
            .iter()
            .map(|s| s.info())
            .collect()
    }

    /// Current statistics
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            sessions: self.inner.sessions.len(),
            authenticated_sessions: self.inner.sessions.authenticated_count(),
            tools: self.inner.tools.len(),
            handlers: self.inner.handlers.len(),
            running: self.is_running(),
        }
    }

    /// Registered tool definitions
    pub fn tools(&self) -> Vec<Tool> {
        self.inner.tools.list()
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }
}

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(inner): State<Arc<ServerInner>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

    tracing::debug!(%addr, %client_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| async move {
        inner
            .run_session(tidemcp_transport::accept(socket), client_id, Some(addr))
            .await;
    })
}

impl ServerInner {
    fn emit(&self, event: ServerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn run_session(
        self: Arc<Self>,
        channel: Channel,
        client_id: String,
        remote_addr: Option<SocketAddr>,
    ) {
        let (handle, mut inbound) = channel.into_parts();

        let admitted = self.sessions.admit(self.config.max_connections, || {
            Session::new(
                client_id.clone(),
                remote_addr,
                handle.clone(),
                initial_permissions(self.config.auth_required),
                CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
            )
        });
        let session = match admitted {
            Ok(session) => session,
            Err(Refusal::Full) => {
                tracing::warn!(
                    %client_id,
                    max_connections = self.config.max_connections,
                    "Connection limit reached, refusing client"
                );
                handle.close(close_codes::POLICY_VIOLATION, "policy violation");
                self.emit(ServerEvent::Rejected {
                    client_id,
                    remote_addr,
                });
                while inbound.recv().await.is_some() {}
                return;
            }
            Err(Refusal::ShuttingDown) => {
                tracing::debug!(%client_id, "Server stopping, refusing client");
                handle.close(close_codes::NORMAL, "Server shutting down");
                while inbound.recv().await.is_some() {}
                return;
            }
        };

        let span = tracing::info_span!(
            "session",
            session_id = %session.id(),
            client_id = %client_id
        );
        async move {
            let welcome = WelcomeParams {
                session_id: session.id().to_string(),
                client_id: client_id.clone(),
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: CAPABILITIES.iter().map(|c| (*c).to_string()).collect(),
                auth_required: self.config.auth_required,
                server_name: self.config.name.clone(),
                server_version: self.config.version.clone(),
            };
            if let Err(e) = session.notify(methods::WELCOME, serde_json::to_value(&welcome).ok()) {
                tracing::debug!(error = %e, "Failed to send welcome");
            }
            tracing::info!(?remote_addr, "Session opened");
            self.emit(ServerEvent::Connection {
                session_id: session.id().to_string(),
                client_id: client_id.clone(),
                remote_addr,
            });

            let close = loop {
                let Some(event) = inbound.recv().await else {
                    break CloseInfo::new(close_codes::ABNORMAL, "channel ended");
                };
                if let Some(info) = self.on_inbound(&session, event) {
                    break info;
                }
            };

            self.sessions.remove(session.id());
            tracing::info!(code = close.code, reason = %close.reason, "Session closed");
            self.emit(ServerEvent::Disconnection {
                session_id: session.id().to_string(),
                client_id,
                code: close.code,
                reason: close.reason,
            });
        }
        .instrument(span)
        .await;
    }

    /// Apply one inbound event; returns how the channel ended once it has
    fn on_inbound(self: &Arc<Self>, session: &Arc<Session>, event: Inbound) -> Option<CloseInfo> {
        match event {
            // Closed or reaped sessions no longer run handlers.
            Inbound::Message(_) | Inbound::Malformed { .. } if !self.is_live(session) => {
                tracing::debug!("Dropping frame for closed session");
            }
            Inbound::Message(message) => {
                session.touch();
                self.handle_message(session, message);
            }
            Inbound::Malformed { error, .. } => {
                session.touch();
                tracing::warn!(%error, "Malformed frame");
                let reply = Message::from_mcp_error(new_id(), &McpError::parse_error(error));
                let _ = session.send(reply);
            }
            Inbound::Ping | Inbound::Pong => session.touch(),
            Inbound::Closed(info) => return Some(info),
        }
        None
    }

    fn is_live(&self, session: &Session) -> bool {
        session.is_open() && self.sessions.contains(session.id())
    }

    fn handle_message(self: &Arc<Self>, session: &Arc<Session>, message: Message) {
        match message.kind {
            MessageType::Request => {
                let inner = Arc::clone(self);
                let session = Arc::clone(session);
                tokio::spawn(
                    async move {
                        let reply = inner.dispatch(&session, message).await;
                        if let Err(e) = session.send(reply) {
                            tracing::debug!(error = %e, "Reply dropped, session closed");
                        }
                    }
                    .in_current_span(),
                );
            }
            MessageType::Notification => {
                if message.method_name() == methods::HEARTBEAT {
                    return;
                }
                self.emit(ServerEvent::Notification {
                    session_id: session.id().to_string(),
                    method: message.method.unwrap_or_default(),
                    params: message.params,
                });
            }
            MessageType::Response | MessageType::Error => {
                tracing::debug!(id = %message.id, "Ignoring unsolicited reply");
            }
        }
    }

    /// Run one request to completion and build its reply
    async fn dispatch(&self, session: &Arc<Session>, request: Message) -> Message {
        let Message {
            id, method, params, ..
        } = request;
        let method = method.unwrap_or_default();

        match self.invoke(session, &method, params).await {
            Ok(result) => Message::response(id, result),
            Err(error) => Message::error(id, error),
        }
    }

    async fn invoke(
        &self,
        session: &Arc<Session>,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ErrorObject> {
        if self.config.auth_required && !session.is_authenticated() && method != methods::AUTHENTICATE
        {
            tracing::debug!(method, "Rejected unauthenticated request");
            return Err(McpError::authentication_required().to_error_object());
        }

        let Some(handler) = self.handlers.get(method) else {
            return Err(McpError::method_not_found(method).to_error_object());
        };

        let call = AssertUnwindSafe(handler(params, Arc::clone(session))).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.request_timeout(), call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(McpError::internal(format!(
                "Handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
            Err(_) => Err(McpError::request_timeout(method)),
        };

        outcome.map_err(|err| {
            tracing::debug!(method, kind = %err.kind, error = %err, "Handler failed");
            handler_failure(&err)
        })
    }
}

/// Handler failures always travel as -32603; the kind stays in `data`.
fn handler_failure(err: &McpError) -> ErrorObject {
    ErrorObject {
        code: INTERNAL_ERROR,
        ..err.to_error_object()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemcp_core::ErrorKind;
    use tidemcp_core::error::{AUTHENTICATION_REQUIRED, METHOD_NOT_FOUND};

    use std::sync::atomic::{AtomicUsize, Ordering};
    use tidemcp_transport::Outbound;

    use crate::session::tests::{detached_session, detached_session_with_outbound};

    fn server(config: ServerConfig) -> McpServer {
        McpServer::new(config)
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = server(ServerConfig::default());
        let session = Arc::new(detached_session(false));
        let reply = server
            .inner
            .dispatch(&session, Message::request("nope", None))
            .await;
        assert_eq!(reply.kind, MessageType::Error);
        assert_eq!(reply.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_auth_gate_allows_only_authenticate() {
        let server = server(ServerConfig::default().with_auth_required(true));
        let session = Arc::new(detached_session(true));

        let reply = server
            .inner
            .dispatch(&session, Message::request(methods::LIST_TOOLS, None))
            .await;
        assert_eq!(reply.error.unwrap().code, AUTHENTICATION_REQUIRED);

        let reply = server
            .inner
            .dispatch(
                &session,
                Message::request(methods::AUTHENTICATE, Some(json!({"credentials": {"username": "admin", "password": "admin"}}))),
            )
            .await;
        assert_eq!(reply.kind, MessageType::Response);

        let reply = server
            .inner
            .dispatch(&session, Message::request(methods::LIST_TOOLS, None))
            .await;
        assert_eq!(reply.kind, MessageType::Response);
    }

    #[tokio::test]
    async fn test_handler_error_is_internal_with_kind() {
        let server = server(ServerConfig::default());
        server.register_handler("fail", |_, _| async {
            Err(McpError::invalid_params("bad input"))
        });
        let session = Arc::new(detached_session(false));

        let request = Message::request("fail", None);
        let id = request.id.clone();
        let reply = server.inner.dispatch(&session, request).await;
        assert_eq!(reply.id, id);
        let error = reply.error.clone().unwrap();
        assert_eq!(error.code, INTERNAL_ERROR);
        assert_eq!(error.message, "bad input");

        let restored = reply.into_result().unwrap_err();
        assert_eq!(restored.kind, ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn test_handler_panic_is_caught() {
        let server = server(ServerConfig::default());
        server.register_handler("boom", |_, _| async { panic!("kaboom") });
        let session = Arc::new(detached_session(false));

        let reply = server
            .inner
            .dispatch(&session, Message::request("boom", None))
            .await;
        let error = reply.error.unwrap();
        assert_eq!(error.code, INTERNAL_ERROR);
        assert!(error.message.contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let server = server(ServerConfig::default().with_request_timeout(Duration::from_millis(100)));
        server.register_handler("slow", |_, _| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });
        let session = Arc::new(detached_session(false));

        let reply = server
            .inner
            .dispatch(&session, Message::request("slow", None))
            .await;
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::RequestTimeout);
        assert_eq!(err.message, "Request timeout: slow");
    }

    #[tokio::test]
    async fn test_builtins_can_be_overridden() {
        let server = server(ServerConfig::default());
        let before = server.stats().handlers;
        server.register_handler(methods::GET_CONTEXT, |_, _| async { Ok(json!("custom")) });
        assert_eq!(server.stats().handlers, before);

        let session = Arc::new(detached_session(false));
        let reply = server
            .inner
            .dispatch(&session, Message::request(methods::GET_CONTEXT, None))
            .await;
        assert_eq!(reply.into_result().unwrap(), json!("custom"));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let server = server(ServerConfig::default().with_bind_address("127.0.0.1:0"));
        assert!(!server.stats().running);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.start().await.is_err());

        server.stop().await;
        server.stop().await;
        assert!(!server.is_running());
        assert!(server.local_addr().is_none());

        // restart after stop
        let again = server.start().await.unwrap();
        assert!(server.is_running());
        server.stop().await;
        assert_ne!(again.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = blocker.local_addr().unwrap().to_string();

        let server = server(ServerConfig::default());
        let err = server.start_at(&taken).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert!(!server.is_running());
    }

    #[test]
    fn test_stats_count_registrations() {
        let server = server(ServerConfig::default());
        server
            .register_tool(Tool::new("echo", "echo"), |input| async move { Ok(input) })
            .unwrap();
        let stats = server.stats();
        assert_eq!(stats.tools, 1);
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.handlers, 6);
        assert_eq!(server.tools()[0].name, "echo");
        assert!(server.unregister_tool("echo"));
    }

    fn counting_server() -> (McpServer, Arc<AtomicUsize>) {
        let server = server(ServerConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        server.register_handler("record", move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        (server, calls)
    }

    #[tokio::test]
    async fn test_requests_after_close_session_are_dropped() {
        let (server, calls) = counting_server();
        let (session, mut outbound) = detached_session_with_outbound(false);
        let session = server.inner.sessions.admit(10, || session).unwrap();

        assert!(server.close_session(session.id(), close_codes::GOING_AWAY, "kick"));
        for _ in 0..5 {
            let event = Inbound::Message(Message::request("record", None));
            assert!(server.inner.on_inbound(&session, event).is_none());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(outbound.try_recv(), Ok(Outbound::Close { code: 1001, .. })));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_requests_for_removed_session_are_dropped() {
        let (server, calls) = counting_server();
        let live = server
            .inner
            .sessions
            .admit(10, || detached_session(false))
            .unwrap();
        let removed = server
            .inner
            .sessions
            .admit(10, || detached_session(false))
            .unwrap();
        server.inner.sessions.remove(removed.id());

        server
            .inner
            .on_inbound(&removed, Inbound::Message(Message::request("record", None)));
        server
            .inner
            .on_inbound(&live, Inbound::Message(Message::request("record", None)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heartbeat_notifications_keep_session_alive() {
        let server = server(ServerConfig::default());
        let table = &server.inner.sessions;
        let (active, mut active_rx) = detached_session_with_outbound(false);
        let (silent, mut silent_rx) = detached_session_with_outbound(false);
        let active = table.admit(10, || active).unwrap();
        let silent = table.admit(10, || silent).unwrap();

        let stale = chrono::Utc::now() - chrono::Duration::seconds(60);
        active.set_last_activity(stale);
        silent.set_last_activity(stale);

        let beat = Message::notification(methods::HEARTBEAT, None);
        assert!(server.inner.on_inbound(&active, Inbound::Message(beat)).is_none());

        assert_eq!(heartbeat::sweep(table, Duration::from_secs(10)), 1);
        assert!(table.get(active.id()).is_some());
        assert!(table.get(silent.id()).is_none());
        assert_eq!(
            silent_rx.try_recv().unwrap(),
            Outbound::Close {
                code: close_codes::GOING_AWAY,
                reason: "heartbeat timeout".into()
            }
        );
        assert_eq!(active_rx.try_recv().unwrap(), Outbound::Ping);
    }

    #[tokio::test]
    async fn test_stop_closes_table_and_restart_reopens_it() {
        let server = server(ServerConfig::default().with_bind_address("127.0.0.1:0"));
        server.start().await.unwrap();
        let (session, mut outbound) = detached_session_with_outbound(false);
        server.inner.sessions.admit(10, || session).unwrap();

        server.stop().await;
        assert_eq!(server.stats().sessions, 0);
        assert_eq!(
            outbound.try_recv().unwrap(),
            Outbound::Close {
                code: close_codes::NORMAL,
                reason: "Server shutting down".into()
            }
        );
        assert_eq!(
            server
                .inner
                .sessions
                .admit(10, || detached_session(false))
                .unwrap_err(),
            Refusal::ShuttingDown
        );

        server.start().await.unwrap();
        assert!(server.inner.sessions.admit(10, || detached_session(false)).is_ok());
        server.stop().await;
        assert_eq!(server.stats().sessions, 0);
    }
}
