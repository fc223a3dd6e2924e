//! # tidemcp Transport
//!
//! Duplex channel used by both ends of a tidemcp connection.
//!
//! - [`Channel`] / [`ChannelHandle`]: send protocol messages, pings and a
//!   close frame; receive [`Inbound`] events (messages, malformed frames,
//!   ping/pong, and exactly one final [`Inbound::Closed`]).
//! - `client` feature: [`connect`] dials a server with tokio-tungstenite and
//!   sends the `x-client-id` upgrade header.
//! - `server` feature: [`accept`] wraps an axum WebSocket.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod channel;
pub mod error;
mod websocket;

#[cfg(feature = "client")]
mod connect;
#[cfg(feature = "server")]
mod server;

pub use channel::{Channel, ChannelHandle, CloseInfo, Inbound, Outbound};
pub use error::{TransportError, TransportResult};

#[cfg(feature = "client")]
pub use connect::connect;
#[cfg(feature = "server")]
pub use server::accept;

/// Upgrade header carrying the client id
pub const CLIENT_ID_HEADER: &str = "x-client-id";
