//! Connection controller.
//!
//! One background reader per connection owns the inbound side of the
//! channel and routes frames:
//!
//! - `response` / `error` → the [`Correlator`] entry with the same id
//! - `notification` → [`ClientEvent::Notification`]
//! - `request` → answered with "method not found" (the client exposes no
//!   methods)
//! - close → pending requests rejected, state reset, reconnect scheduled
//!   for abnormal closes when enabled
//!
//! Each connection carries a generation number so that a late close from an
//! old connection never tears down its replacement.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tidemcp_core::{
    AuthenticateParams, AuthenticateResult, ContextPatch, ContextRecord, ErrorKind,
    ListToolsResult, McpError, McpResult, Message, MessageType, SessionInfo, Tool, WelcomeParams,
    close_codes, methods,
};
use tidemcp_transport::{ChannelHandle, CloseInfo, Inbound};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::Caches;
use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::events::{ClientEvent, ConnectionState};
use crate::reconnect::ReconnectPolicy;

const EVENT_CAPACITY: usize = 256;

/// tidemcp client
///
/// Cheap to clone; clones share one connection.
///
/// ```rust,no_run
/// use serde_json::json;
/// use tidemcp_client::{ClientConfig, McpClient};
///
/// # async fn run() -> tidemcp_core::McpResult<()> {
/// let client = McpClient::new(ClientConfig::default().with_server_url("ws://127.0.0.1:8080"))?;
/// client.connect().await?;
/// let result = client
///     .execute_tool("echo", json!({ "message": "Hello, MCP!" }))
///     .await?;
/// println!("{result}");
/// client.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    config: ClientConfig,
    client_id: String,
    policy: ReconnectPolicy,
    correlator: Correlator,
    caches: Caches,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ClientEvent>,
    session: RwLock<SessionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    /// Cancelled by `disconnect()`; governs reconnect loops and links
    lifecycle: Mutex<CancellationToken>,
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    authenticated: bool,
    permissions: Vec<String>,
}

/// The live connection
#[derive(Debug)]
struct Link {
    generation: u64,
    handle: ChannelHandle,
    cancel: CancellationToken,
    /// Handshake completed; only ready links reconnect on abnormal close
    ready: bool,
}

impl McpClient {
    /// Create a disconnected client
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(config: ClientConfig) -> McpResult<Self> {
        config.validate()?;
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(ClientInner {
                policy: ReconnectPolicy::from_config(&config),
                config,
                client_id,
                correlator: Correlator::default(),
                caches: Caches::default(),
                state,
                events,
                session: RwLock::new(SessionState::default()),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                lifecycle: Mutex::new(CancellationToken::new()),
            }),
        })
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Client id sent in `x-client-id`
    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// Open the channel and run the handshake
    ///
    /// Waits for `welcome`, authenticates when the server requires it and
    /// authentication is configured, warms the tool and context caches, and
    /// starts the heartbeat. Returns immediately if already connected.
    ///
    /// # Errors
    ///
    /// - transport errors when the socket cannot be opened
    /// - `RequestTimeout` when no `welcome` arrives within the connect timeout
    /// - `ConnectionClosed` when the server closes during the handshake
    ///   (e.g. 1008 when it is full)
    /// - `AuthenticationFailed` when the server rejects the credentials;
    ///   an unanswered `authenticate` stays a `RequestTimeout`
    pub async fn connect(&self) -> McpResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let lifecycle = {
            let mut current = self.inner.lifecycle.lock();
            current.cancel();
            *current = CancellationToken::new();
            current.clone()
        };
        if let Some(stale) = self.inner.link.lock().take() {
            stale.cancel.cancel();
            stale.handle.close(close_codes::NORMAL, "Reconnecting");
        }
        self.inner.establish(&lifecycle).await
    }

    /// Close the connection and stop reconnecting. Idempotent.
    ///
    /// Pending requests fail with `ConnectionClosed`.
    pub fn disconnect(&self) {
        self.inner.lifecycle.lock().cancel();
        let link = self.inner.link.lock().take();
        let was_connected = link.is_some();
        if let Some(link) = link {
            link.cancel.cancel();
            link.handle.close(close_codes::NORMAL, "Client disconnect");
        }
        self.inner
            .correlator
            .reject_all(&McpError::connection_closed("Connection closed"));
        self.inner.reset_session();

        let previous = self.inner.state.send_replace(ConnectionState::Disconnected);
        if was_connected || previous != ConnectionState::Disconnected {
            tracing::info!(client_id = %self.inner.client_id, "Disconnected");
            self.inner.emit(ClientEvent::Disconnected {
                code: close_codes::NORMAL,
                reason: "Client disconnect".to_string(),
            });
        }
    }

    /// Send a request and wait for its reply
    ///
    /// `timeout` overrides the configured request timeout for this call.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` immediately when not connected, or when the
    ///   connection drops before the reply arrives
    /// - `RequestTimeout` ("Request timeout: `<method>`") when no reply
    ///   arrives in time
    /// - the error carried by the server's `error` reply
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        self.inner.request(method, params, timeout).await
    }

    /// Send a notification; logs a warning and does nothing when not connected
    pub fn notify(&self, method: &str, params: Option<Value>) {
        let handle = self.inner.link.lock().as_ref().map(|l| l.handle.clone());
        match handle {
            Some(handle) => {
                if let Err(e) = handle.send(Message::notification(method, params)) {
                    tracing::warn!(method, error = %e, "Notification not sent");
                }
            }
            None => tracing::warn!(method, "Not connected, notification dropped"),
        }
    }

    /// Authenticate the current session explicitly
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` when the server rejects the material.
    pub async fn authenticate(&self, params: AuthenticateParams) -> McpResult<AuthenticateResult> {
        self.inner.authenticate(params).await
    }

    /// Execute a tool known to the local tool cache
    ///
    /// A tool missing from the cache fails with `ToolNotFound` without a
    /// server round-trip; call [`Self::list_tools`] to refresh the cache.
    ///
    /// # Errors
    ///
    /// `ToolNotFound` on a cache miss, otherwise as [`Self::request`].
    pub async fn execute_tool(&self, name: &str, input: Value) -> McpResult<Value> {
        if !self.inner.caches.has_tool(name) {
            return Err(McpError::tool_not_found(name));
        }
        self.inner
            .request(
                methods::EXECUTE_TOOL,
                Some(json!({ "name": name, "input": input })),
                None,
            )
            .await
    }

    /// Fetch the tool list and refresh the tool cache
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        self.inner.refresh_tools().await
    }

    /// Fetch this session's context and refresh the context cache
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn get_context(&self) -> McpResult<ContextRecord> {
        self.inner.refresh_context().await
    }

    /// Update this session's context and refresh the context cache
    ///
    /// # Errors
    ///
    /// As [`Self::request`].
    pub async fn update_context(&self, patch: ContextPatch) -> McpResult<ContextRecord> {
        let params = serde_json::to_value(&patch)
            .map_err(|e| McpError::invalid_params(format!("Invalid context patch: {e}")))?;
        let context: ContextRecord = self
            .inner
            .typed_request(methods::UPDATE_CONTEXT, Some(params))
            .await?;
        self.inner.caches.set_context(context.clone());
        Ok(context)
    }

    /// List every session on the server (requires `admin`)
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without `admin`, otherwise as [`Self::request`].
    pub async fn list_sessions(&self) -> McpResult<Vec<SessionInfo>> {
        #[derive(serde::Deserialize)]
        struct Sessions {
            sessions: Vec<SessionInfo>,
        }
        let result: Sessions = self
            .inner
            .typed_request(methods::LIST_SESSIONS, None)
            .await?;
        Ok(result.sessions)
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Wait until the client reaches `state`; `false` on timeout
    pub async fn wait_for_state(&self, state: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    /// Whether the handshake has completed on a live connection
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Session id from the last `welcome`
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.read().session_id.clone()
    }

    /// Whether the current session authenticated
    pub fn is_authenticated(&self) -> bool {
        self.inner.session.read().authenticated
    }

    /// Permissions granted by the last successful authentication
    pub fn permissions(&self) -> Vec<String> {
        self.inner.session.read().permissions.clone()
    }

    /// Tool list as of the last refresh
    pub fn cached_tools(&self) -> Arc<Vec<Tool>> {
        self.inner.caches.tools()
    }

    /// Context as of the last refresh
    pub fn cached_context(&self) -> Option<Arc<ContextRecord>> {
        self.inner.caches.context()
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Number of requests awaiting a reply
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.len()
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "State changed");
        }
    }

    fn reset_session(&self) {
        *self.session.write() = SessionState::default();
        self.caches.clear();
    }

    fn current_handle(&self) -> Option<ChannelHandle> {
        self.link.lock().as_ref().map(|l| l.handle.clone())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let Some(handle) = self.current_handle() else {
            return Err(McpError::connection_closed("Not connected"));
        };

        let message = Message::request(method, params);
        let id = message.id.clone();
        let rx = self.correlator.register(id.clone(), method);
        if let Err(e) = handle.send(message) {
            self.correlator.cancel(&id);
            return Err(e.into());
        }
        tracing::trace!(request_id = %id, method, "Request sent");

        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        self.correlator.wait(&id, method, rx, timeout).await
    }

    async fn typed_request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<T> {
        let value = self.request(method, params, None).await?;
        serde_json::from_value(value)
            .map_err(|e| McpError::internal(format!("Unexpected {method} result: {e}")))
    }

    async fn authenticate(&self, params: AuthenticateParams) -> McpResult<AuthenticateResult> {
        let params = serde_json::to_value(&params)
            .map_err(|e| McpError::invalid_params(format!("Invalid credentials: {e}")))?;
        let result: AuthenticateResult =
            self.typed_request(methods::AUTHENTICATE, Some(params)).await?;

        let mut session = self.session.write();
        session.authenticated = result.authenticated;
        session.permissions = result.permissions.clone();
        Ok(result)
    }

    async fn refresh_tools(&self) -> McpResult<Vec<Tool>> {
        let ListToolsResult { tools } = self.typed_request(methods::LIST_TOOLS, None).await?;
        self.caches.set_tools(tools.clone());
        Ok(tools)
    }

    async fn refresh_context(&self) -> McpResult<ContextRecord> {
        let context: ContextRecord = self.typed_request(methods::GET_CONTEXT, None).await?;
        self.caches.set_context(context.clone());
        Ok(context)
    }

    /// One connection attempt: socket, `welcome`, authentication, cache warm-up
    async fn establish(self: &Arc<Self>, lifecycle: &CancellationToken) -> McpResult<()> {
        self.set_state(ConnectionState::Connecting);
        let result = self.handshake(lifecycle).await;
        if let Err(e) = &result {
            tracing::warn!(url = %self.config.server_url, error = %e, "Connection attempt failed");
            if self.link.lock().is_none() {
                self.set_state(ConnectionState::Disconnected);
            }
        }
        result
    }

    async fn handshake(self: &Arc<Self>, lifecycle: &CancellationToken) -> McpResult<()> {
        let connect_timeout = self.config.connect_timeout();
        let channel =
            tidemcp_transport::connect(&self.config.server_url, &self.client_id, connect_timeout)
                .await?;
        let (handle, mut inbound) = channel.into_parts();

        let welcome = match tokio::time::timeout(connect_timeout, wait_for_welcome(&mut inbound))
            .await
        {
            Ok(Ok(welcome)) => welcome,
            Ok(Err(e)) => {
                handle.close(close_codes::NORMAL, "Handshake failed");
                return Err(e);
            }
            Err(_) => {
                handle.close(close_codes::NORMAL, "Handshake timeout");
                return Err(McpError::new(
                    ErrorKind::RequestTimeout,
                    format!(
                        "Connection timeout: no welcome within {}ms",
                        connect_timeout.as_millis()
                    ),
                ));
            }
        };
        tracing::info!(
            session_id = %welcome.session_id,
            server = %welcome.server_name,
            protocol_version = %welcome.protocol_version,
            auth_required = welcome.auth_required,
            "Received welcome"
        );

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = lifecycle.child_token();
        *self.link.lock() = Some(Link {
            generation,
            handle: handle.clone(),
            cancel: cancel.clone(),
            ready: false,
        });
        *self.session.write() = SessionState {
            session_id: Some(welcome.session_id.clone()),
            ..SessionState::default()
        };
        tokio::spawn(read_loop(
            Arc::clone(self),
            generation,
            inbound,
            cancel.clone(),
        ));

        if lifecycle.is_cancelled() {
            self.teardown(generation, close_codes::NORMAL, "Client disconnect");
            return Err(McpError::connection_closed("Disconnected during handshake"));
        }

        if welcome.auth_required {
            match self.config.authentication.as_ref() {
                Some(auth) => {
                    self.set_state(ConnectionState::Authenticating);
                    if let Err(e) = self.authenticate(auth.to_params()).await {
                        self.teardown(generation, close_codes::NORMAL, "Authentication failed");
                        return Err(authentication_error(e));
                    }
                }
                None => tracing::warn!(
                    "Server requires authentication but none is configured; \
                     requests will fail until authenticate() succeeds"
                ),
            }
        }

        if let Err(e) = self.refresh_tools().await {
            tracing::warn!(error = %e, "Could not load tool list");
        }
        if let Err(e) = self.refresh_context().await {
            tracing::warn!(error = %e, "Could not load context");
        }

        {
            let mut link = self.link.lock();
            match link.as_mut() {
                Some(link) if link.generation == generation => link.ready = true,
                _ => {
                    return Err(McpError::connection_closed(
                        "Connection closed during handshake",
                    ));
                }
            }
        }
        self.set_state(ConnectionState::Ready);
        self.emit(ClientEvent::Connected {
            session_id: welcome.session_id,
        });
        tokio::spawn(heartbeat(handle, self.config.heartbeat_interval(), cancel));
        Ok(())
    }

    /// Drop the link of `generation` (if still current) and close it
    fn teardown(&self, generation: u64, code: u16, reason: &str) -> Option<Link> {
        let link = {
            let mut guard = self.link.lock();
            if guard.as_ref().is_some_and(|l| l.generation == generation) {
                guard.take()
            } else {
                None
            }
        }?;
        link.cancel.cancel();
        link.handle.close(code, reason);
        self.correlator.reject_all(&McpError::connection_closed(format!(
            "Connection closed ({code}): {reason}"
        )));
        self.reset_session();
        self.set_state(ConnectionState::Disconnected);
        Some(link)
    }

    fn on_closed(self: &Arc<Self>, generation: u64, info: CloseInfo) {
        let Some(link) = self.teardown(generation, info.code, &info.reason) else {
            return;
        };
        tracing::info!(code = info.code, reason = %info.reason, "Connection closed");
        self.emit(ClientEvent::Disconnected {
            code: info.code,
            reason: info.reason.clone(),
        });

        if link.ready && self.config.auto_reconnect && !info.is_normal() {
            let lifecycle = self.lifecycle.lock().clone();
            if !lifecycle.is_cancelled() {
                tokio::spawn(reconnect(Arc::clone(self), lifecycle));
            }
        }
    }

    fn on_message(&self, handle: &ChannelHandle, message: Message) {
        match message.kind {
            MessageType::Response | MessageType::Error => {
                let id = message.id.clone();
                self.correlator.complete(&id, message.into_result());
            }
            MessageType::Notification => {
                if message.method_name() == methods::WELCOME {
                    return;
                }
                tracing::debug!(method = message.method_name(), "Notification received");
                self.emit(ClientEvent::Notification {
                    method: message.method.unwrap_or_default(),
                    params: message.params,
                });
            }
            MessageType::Request => {
                let error = McpError::method_not_found(message.method_name());
                let _ = handle.send(Message::from_mcp_error(message.id, &error));
            }
        }
    }
}

async fn wait_for_welcome(inbound: &mut mpsc::UnboundedReceiver<Inbound>) -> McpResult<WelcomeParams> {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Message(message) if message.is_notification_for(methods::WELCOME) => {
                return serde_json::from_value(message.params.unwrap_or(Value::Null))
                    .map_err(|e| McpError::parse_error(format!("Invalid welcome: {e}")));
            }
            Inbound::Closed(info) => {
                return Err(McpError::connection_closed(format!(
                    "Connection closed before welcome ({}): {}",
                    info.code, info.reason
                )));
            }
            _ => tracing::debug!("Ignoring frame received before welcome"),
        }
    }
    Err(McpError::connection_closed("Connection closed before welcome"))
}

async fn read_loop(
    inner: Arc<ClientInner>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    cancel: CancellationToken,
) {
    let Some(handle) = inner
        .link
        .lock()
        .as_ref()
        .filter(|l| l.generation == generation)
        .map(|l| l.handle.clone())
    else {
        return;
    };

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = inbound.recv() => event,
        };
        match event {
            Some(Inbound::Message(message)) => inner.on_message(&handle, message),
            Some(Inbound::Malformed { error, .. }) => {
                tracing::warn!(%error, "Malformed frame from server");
            }
            Some(Inbound::Ping | Inbound::Pong) => {}
            Some(Inbound::Closed(info)) => {
                inner.on_closed(generation, info);
                break;
            }
            None => {
                inner.on_closed(
                    generation,
                    CloseInfo::new(close_codes::ABNORMAL, "channel ended"),
                );
                break;
            }
        }
    }
    tracing::debug!(generation, "Reader stopped");
}

/// Server refusals become `AuthenticationFailed`; timeouts and dropped
/// connections keep their kind so callers can retry them.
fn authentication_error(e: McpError) -> McpError {
    if e.kind == ErrorKind::AuthenticationFailed || e.is_retryable() {
        e
    } else {
        McpError::authentication_failed(e.message)
    }
}

async fn heartbeat(handle: ChannelHandle, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if handle.send(Message::notification(methods::HEARTBEAT, None)).is_err() {
                    break;
                }
            }
        }
    }
}

async fn reconnect(inner: Arc<ClientInner>, lifecycle: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let delay = inner.policy.delay(attempt);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        inner.emit(ClientEvent::Reconnecting { attempt, delay });

        tokio::select! {
            () = lifecycle.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        if lifecycle.is_cancelled() {
            return;
        }

        match inner.establish(&lifecycle).await {
            Ok(()) => {
                tracing::info!(attempt, "Reconnected");
                return;
            }
            Err(e) if lifecycle.is_cancelled() => {
                tracing::debug!(error = %e, "Reconnect abandoned");
                return;
            }
            Err(_) => {}
        }
    }
}
