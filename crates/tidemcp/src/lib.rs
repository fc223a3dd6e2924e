//! # tidemcp
//!
//! A duplex tool-calling protocol over WebSocket. A server exposes named,
//! schema-described tools and per-session context; clients connect, receive
//! a `welcome`, optionally authenticate, and invoke tools with correlated
//! requests. Either side may push notifications at any time.
//!
//! ## Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`core`] | Message envelope, `McpError`, shared payload types, logging |
//! | [`transport`] | WebSocket duplex channel |
//! | [`server`] | `McpServer` session manager (feature `server`) |
//! | [`client`] | `McpClient` connection controller (feature `client`) |
//!
//! ## Example
//!
//! ```rust,no_run
//! use tidemcp::prelude::*;
//!
//! # async fn run() -> McpResult<()> {
//! let server = McpServer::new(ServerConfig::default().with_bind_address("127.0.0.1:0"));
//! server.register_tool(
//!     Tool::new("echo", "Echo a message").with_input_schema(json!({
//!         "type": "object",
//!         "properties": { "message": { "type": "string" } },
//!         "required": ["message"]
//!     })),
//!     |input: Value| async move { Ok(json!({ "echo": input["message"] })) },
//! )?;
//! let addr = server.start().await?;
//!
//! let client = McpClient::new(ClientConfig::default().with_server_url(format!("ws://{addr}")))?;
//! client.connect().await?;
//! let reply = client.execute_tool("echo", json!({ "message": "Hello, MCP!" })).await?;
//! assert_eq!(reply, json!({ "echo": "Hello, MCP!" }));
//!
//! client.disconnect();
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub use tidemcp_core as core;
pub use tidemcp_transport as transport;

#[cfg(feature = "client")]
pub use tidemcp_client as client;
#[cfg(feature = "server")]
pub use tidemcp_server as server;

pub use tidemcp_core::{
    ContextPatch, ContextRecord, ErrorKind, LoggingConfig, McpError, McpResult, Message,
    MessageType, PROTOCOL_VERSION, ResourceRef, SessionInfo, Tool, close_codes, methods,
    permissions,
};

#[cfg(feature = "client")]
pub use tidemcp_client::{ClientConfig, ClientEvent, ConnectionState, McpClient};
#[cfg(feature = "server")]
pub use tidemcp_server::{
    Authenticator, McpServer, ServerConfig, ServerEvent, ServerStats, Session,
};

/// Everything needed to write a server or client
pub mod prelude {
    pub use super::{
        ContextPatch, ContextRecord, ErrorKind, McpError, McpResult, Message, MessageType,
        ResourceRef, Tool, methods, permissions,
    };

    #[cfg(feature = "client")]
    pub use super::{ClientConfig, ClientEvent, ConnectionState, McpClient};
    #[cfg(feature = "server")]
    pub use super::{Authenticator, McpServer, ServerConfig, ServerEvent, Session};

    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
