//! Per-connection session state and the session table.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tidemcp_core::{
    ContextPatch, ContextRecord, McpError, McpResult, Message, SessionInfo, permissions,
};
use tidemcp_transport::ChannelHandle;

#[derive(Debug)]
struct AuthState {
    authenticated: bool,
    permissions: HashSet<String>,
}

/// Server-side state for one connected client
///
/// A session is created when a connection is admitted and dropped from the
/// session table when its channel closes. Handlers receive an
/// `Arc<Session>` for the caller.
#[derive(Debug)]
pub struct Session {
    id: String,
    client_id: String,
    remote_addr: Option<SocketAddr>,
    channel: ChannelHandle,
    auth: RwLock<AuthState>,
    context: RwLock<ContextRecord>,
    connected_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
}

impl Session {
    pub(crate) fn new(
        client_id: String,
        remote_addr: Option<SocketAddr>,
        channel: ChannelHandle,
        initial_permissions: HashSet<String>,
        capabilities: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            client_id,
            remote_addr,
            channel,
            auth: RwLock::new(AuthState {
                authenticated: false,
                permissions: initial_permissions,
            }),
            context: RwLock::new(ContextRecord::new(capabilities)),
            connected_at: now,
            last_activity: RwLock::new(now),
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Client id from the `x-client-id` header (or generated)
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Remote socket address, when known
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the session has authenticated
    pub fn is_authenticated(&self) -> bool {
        self.auth.read().authenticated
    }

    /// Permissions currently granted
    pub fn permissions(&self) -> HashSet<String> {
        self.auth.read().permissions.clone()
    }

    /// Whether `permission` is granted
    pub fn has_permission(&self, permission: &str) -> bool {
        self.auth.read().permissions.contains(permission)
    }

    /// Fail with `PermissionDenied` unless `permission` is granted
    ///
    /// # Errors
    ///
    /// Returns [`tidemcp_core::ErrorKind::PermissionDenied`] when missing.
    pub fn require(&self, permission: &str) -> McpResult<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(McpError::permission_denied(permission))
        }
    }

    /// Mark the session authenticated with `granted` permissions
    pub fn authenticate<I>(&self, granted: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut auth = self.auth.write();
        auth.authenticated = true;
        auth.permissions = granted.into_iter().collect();
    }

    /// Snapshot of the context record
    pub fn context(&self) -> ContextRecord {
        self.context.read().clone()
    }

    /// Apply `patch` and return the updated record
    pub fn update_context(&self, patch: ContextPatch) -> ContextRecord {
        let mut context = self.context.write();
        context.apply(patch);
        context.clone()
    }

    /// When the session was created
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Last inbound traffic
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read()
    }

    /// Time since the last inbound traffic
    pub fn idle(&self) -> Duration {
        (Utc::now() - self.last_activity())
            .to_std()
            .unwrap_or_default()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, at: DateTime<Utc>) {
        *self.last_activity.write() = at;
    }

    /// Queue a message for this client
    ///
    /// # Errors
    ///
    /// Returns a connection-closed error once the channel is gone.
    pub fn send(&self, message: Message) -> McpResult<()> {
        self.channel.send(message).map_err(McpError::from)
    }

    /// Send a notification to this client
    ///
    /// # Errors
    ///
    /// Returns a connection-closed error once the channel is gone.
    pub fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send(Message::notification(method, params))
    }

    /// Close the underlying channel
    pub fn close(&self, code: u16, reason: &str) {
        self.channel.close(code, reason);
    }

    /// Whether the channel is still open for this session
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub(crate) fn ping(&self) -> McpResult<()> {
        self.channel.ping().map_err(McpError::from)
    }

    /// Summary used by `listSessions`
    pub fn info(&self) -> SessionInfo {
        let auth = self.auth.read();
        SessionInfo {
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            authenticated: auth.authenticated,
            permissions: auth.permissions.clone(),
            connected_at: self.connected_at,
            last_activity: self.last_activity(),
        }
    }
}

/// Permissions an unauthenticated session starts with
pub(crate) fn initial_permissions(auth_required: bool) -> HashSet<String> {
    if auth_required {
        HashSet::new()
    } else {
        permissions::default_set().into_iter().collect()
    }
}

/// Why a connection was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    /// `max_connections` sessions already exist
    Full,
    /// The server is stopping
    ShuttingDown,
}

#[derive(Debug, Default)]
struct Slots {
    sessions: HashMap<String, Arc<Session>>,
    closed: bool,
}

/// All live sessions, keyed by session id
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    slots: RwLock<Slots>,
}

impl SessionTable {
    /// Insert the session built by `make` unless `max` sessions already exist
    /// or the table has been closed
    ///
    /// The checks and the insert happen under one write lock so concurrent
    /// connects can neither overshoot the limit nor slip in after
    /// [`SessionTable::close`].
    pub(crate) fn admit(
        &self,
        max: usize,
        make: impl FnOnce() -> Session,
    ) -> Result<Arc<Session>, Refusal> {
        let mut slots = self.slots.write();
        if slots.closed {
            return Err(Refusal::ShuttingDown);
        }
        if slots.sessions.len() >= max {
            return Err(Refusal::Full);
        }
        let session = Arc::new(make());
        slots.sessions.insert(session.id.clone(), Arc::clone(&session));
        Ok(session)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.slots.read().sessions.get(id).cloned()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.slots.read().sessions.contains_key(id)
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.slots.write().sessions.remove(id)
    }

    /// Refuse further admissions, then remove and return every session
    pub(crate) fn close(&self) -> Vec<Arc<Session>> {
        let mut slots = self.slots.write();
        slots.closed = true;
        slots.sessions.drain().map(|(_, s)| s).collect()
    }

    /// Accept admissions again after [`SessionTable::close`]
    pub(crate) fn reopen(&self) {
        self.slots.write().closed = false;
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Session>> {
        self.slots.read().sessions.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().sessions.len()
    }

    pub(crate) fn authenticated_count(&self) -> usize {
        self.slots
            .read()
            .sessions
            .values()
            .filter(|s| s.is_authenticated())
            .count()
    }
}
