//! # tidemcp Core
//!
//! Foundation crate for the tidemcp duplex protocol. Both the server and the
//! client depend on it for the wire envelope, the error taxonomy and the
//! payload types exchanged by the built-in methods.
//!
//! ## Architecture
//!
//! ```text
//! tidemcp-core/
//! ├── message.rs   # Message envelope (request/response/notification/error)
//! ├── error.rs     # McpError + ErrorKind, JSON-RPC style code mapping
//! ├── types.rs     # Tool, ContextRecord, authentication and session payloads
//! ├── logging.rs   # LoggingConfig and tracing subscriber initialisation
//! └── config_file.rs # File + environment configuration loading
//! ```
//!
//! ## Example
//!
//! ```rust
//! use tidemcp_core::{Message, MessageType, methods};
//!
//! let request = Message::request(methods::LIST_TOOLS, None);
//! assert_eq!(request.kind, MessageType::Request);
//!
//! let json = request.to_json().unwrap();
//! let parsed = Message::parse(&json).unwrap();
//! assert_eq!(parsed.id, request.id);
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod config_file;
pub mod error;
pub mod logging;
pub mod message;
pub mod types;

pub use error::{ErrorKind, McpError, McpResult};
pub use logging::{LogOutput, LogRotation, LoggingConfig, LoggingGuard};
pub use message::{ErrorObject, Message, MessageType};
pub use types::{
    AuthenticateParams, AuthenticateResult, ContextPatch, ContextRecord, Credentials,
    ExecuteToolParams, ListToolsResult, ResourceRef, SessionInfo, Tool, WelcomeParams,
};

/// Protocol version announced in the `welcome` notification.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Method names with built-in meaning on either side of the connection.
pub mod methods {
    /// Server notification sent once per new session.
    pub const WELCOME: &str = "welcome";
    /// Client notification keeping the session alive.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Authenticate the session with a token or credentials.
    pub const AUTHENTICATE: &str = "authenticate";
    /// List the tools registered on the server.
    pub const LIST_TOOLS: &str = "listTools";
    /// Execute a registered tool.
    pub const EXECUTE_TOOL: &str = "executeTool";
    /// Read the calling session's context record.
    pub const GET_CONTEXT: &str = "getContext";
    /// Merge a patch into the calling session's context record.
    pub const UPDATE_CONTEXT: &str = "updateContext";
    /// List every session connected to the server (admin only).
    pub const LIST_SESSIONS: &str = "listSessions";
}

/// WebSocket close codes used by the protocol.
pub mod close_codes {
    /// Normal shutdown or explicit disconnect.
    pub const NORMAL: u16 = 1000;
    /// Peer is going away (used when reaping dead sessions).
    pub const GOING_AWAY: u16 = 1001;
    /// Close frame carried no status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Policy violation (connection limit reached).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Unexpected condition on the server.
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Whether a close with this code should be treated as a clean shutdown.
    pub const fn is_normal(code: u16) -> bool {
        code == NORMAL
    }
}

/// Permission names granted to sessions.
pub mod permissions {
    /// Read access (`getContext`, `listTools`).
    pub const READ: &str = "read";
    /// Write access (`updateContext`).
    pub const WRITE: &str = "write";
    /// Tool execution.
    pub const EXECUTE: &str = "execute";
    /// Administrative methods (`listSessions`).
    pub const ADMIN: &str = "admin";

    /// Permissions granted on successful authentication unless configured otherwise.
    pub const DEFAULT: &[&str] = &[READ, WRITE, EXECUTE];

    /// The default permission set as owned strings.
    pub fn default_set() -> Vec<String> {
        DEFAULT.iter().map(|p| (*p).to_string()).collect()
    }
}
