//! Typed server events and statistics.

use std::net::SocketAddr;

use serde::Serialize;
use serde_json::Value;

/// Something observable happened on the server
///
/// Delivered through the `broadcast` receiver returned by
/// [`crate::McpServer::subscribe`]. Slow subscribers miss events rather than
/// stall sessions.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A session was created and greeted
    Connection {
        /// New session id
        session_id: String,
        /// Client id
        client_id: String,
        /// Peer address
        remote_addr: Option<SocketAddr>,
    },
    /// A session's channel closed and the session was removed
    Disconnection {
        /// Session id
        session_id: String,
        /// Client id
        client_id: String,
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// A client sent a notification (heartbeats excluded)
    Notification {
        /// Sending session
        session_id: String,
        /// Notification method
        method: String,
        /// Notification params
        params: Option<Value>,
    },
    /// A connection was refused because the server is full
    Rejected {
        /// Client id of the refused connection
        client_id: String,
        /// Peer address
        remote_addr: Option<SocketAddr>,
    },
}

/// Point-in-time server statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Live sessions
    pub sessions: usize,
    /// Live sessions that have authenticated
    pub authenticated_sessions: usize,
    /// Registered tools
    pub tools: usize,
    /// Registered request handlers (built-ins included)
    pub handlers: usize,
    /// Whether the listener is running
    pub running: bool,
}
