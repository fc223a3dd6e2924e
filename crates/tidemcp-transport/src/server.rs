//! Server-side adapter for axum WebSocket upgrades.

use axum::extract::ws::WebSocket;

use crate::channel::Channel;
use crate::websocket;

/// Wrap an upgraded axum socket in a [`Channel`].
pub fn accept(socket: WebSocket) -> Channel {
    websocket::spawn(socket)
}
