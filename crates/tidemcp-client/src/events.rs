//! Connection state and client events.

use std::time::Duration;

use serde_json::Value;

/// Where the connection controller is in its lifecycle
///
/// ```text
/// Disconnected ──► Connecting ──► Authenticating? ──► Ready
///      ▲                                                │
///      └──────────── abnormal close / disconnect() ◄────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel
    Disconnected,
    /// Channel opening or waiting for `welcome`
    Connecting,
    /// Presenting credentials
    Authenticating,
    /// Handshake complete
    Ready,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
        })
    }
}

/// Something observable happened on the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake finished
    Connected {
        /// Session id assigned by the server
        session_id: String,
    },
    /// The channel closed
    Disconnected {
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// A reconnect attempt is scheduled
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
        /// Delay before the attempt
        delay: Duration,
    },
    /// The server sent a notification (`welcome` excluded)
    Notification {
        /// Notification method
        method: String,
        /// Notification params
        params: Option<Value>,
    },
}
