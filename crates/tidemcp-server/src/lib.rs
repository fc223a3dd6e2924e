//! # tidemcp Server
//!
//! Session manager for the tidemcp duplex protocol. Accepts WebSocket
//! connections, greets each with a `welcome` notification, enforces the
//! connection limit and authentication, and dispatches requests to the
//! built-in and user-registered handlers.
//!
//! ## Architecture
//!
//! ```text
//! tidemcp-server/
//! ├── server.rs    # McpServer: listener, admission, dispatch, lifecycle
//! ├── session.rs   # Session state + session table
//! ├── handler.rs   # Handler table and built-in methods
//! ├── registry.rs  # Tool registry with JSON Schema input validation
//! ├── auth.rs      # Authenticator trait + static token/user backend
//! ├── heartbeat.rs # Ping sweep and idle reaping
//! ├── events.rs    # ServerEvent, ServerStats
//! └── config.rs    # ServerConfig (defaults, file + environment loading)
//! ```
//!
//! ## Built-in methods
//!
//! | Method | Permission | Result |
//! |--------|------------|--------|
//! | `authenticate` | - | `{authenticated, sessionId, permissions}` |
//! | `listTools` | - | `{tools: [...]}` |
//! | `executeTool` | `execute` | tool result |
//! | `getContext` | - | caller's context record |
//! | `updateContext` | - | updated context record |
//! | `listSessions` | `admin` | `{sessions: [...]}` |
//!
//! When `auth_required` is set, every method except `authenticate` fails
//! with code -32001 until the session authenticates.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod events;
mod handler;
mod heartbeat;
mod registry;
pub mod server;
pub mod session;

pub use auth::{Authenticator, StaticAuthenticator};
pub use config::{AuthConfig, ServerConfig, UserCredential};
pub use events::{ServerEvent, ServerStats};
pub use handler::{RequestHandler, request_handler};
pub use registry::{ToolHandler, tool_handler};
pub use server::{CAPABILITIES, McpServer};
pub use session::Session;

/// Default server name reported in `welcome`
pub const SERVER_NAME: &str = env!("CARGO_PKG_NAME");

/// Default server version reported in `welcome`
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
