//! Client-side connector built on tokio-tungstenite.

use std::time::Duration;

use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::channel::Channel;
use crate::error::{TransportError, TransportResult};
use crate::{CLIENT_ID_HEADER, websocket};

/// Open a channel to `url`, announcing `client_id` in the upgrade request.
///
/// # Errors
///
/// Returns [`TransportError::InvalidRequest`] for a bad URL or client id,
/// [`TransportError::ConnectionTimeout`] if the handshake does not finish
/// within `timeout`, and [`TransportError::ConnectionFailed`] otherwise.
pub async fn connect(url: &str, client_id: &str, timeout: Duration) -> TransportResult<Channel> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
    let header = HeaderValue::from_str(client_id)
        .map_err(|e| TransportError::InvalidRequest(format!("client id: {e}")))?;
    request.headers_mut().insert(CLIENT_ID_HEADER, header);

    let (stream, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| TransportError::ConnectionTimeout {
            url: url.to_string(),
            timeout,
        })?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    tracing::debug!(url, client_id, "WebSocket connected");
    Ok(websocket::spawn(stream))
}
