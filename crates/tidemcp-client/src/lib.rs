//! # tidemcp Client
//!
//! Connection controller for the tidemcp duplex protocol.
//!
//! - **Handshake**: open the WebSocket, wait for `welcome`, authenticate if
//!   the server requires it, warm the tool and context caches.
//! - **Correlation**: any number of concurrent requests, each settled
//!   exactly once by its reply, its timeout, or a disconnect.
//! - **Liveness**: periodic `heartbeat` notifications; abnormal closes
//!   trigger reconnects when `auto_reconnect` is set.
//!
//! ```text
//! tidemcp-client/
//! ├── client.rs     # McpClient, reader task, heartbeat, reconnect loop
//! ├── correlator.rs # Pending requests keyed by id
//! ├── cache.rs      # Tool list and context snapshots
//! ├── reconnect.rs  # Reconnect delay schedule
//! ├── events.rs     # ConnectionState, ClientEvent
//! └── config.rs     # ClientConfig
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

mod cache;
pub mod client;
pub mod config;
mod correlator;
pub mod events;
mod reconnect;

pub use client::McpClient;
pub use config::{Authentication, ClientConfig};
pub use events::{ClientEvent, ConnectionState};
