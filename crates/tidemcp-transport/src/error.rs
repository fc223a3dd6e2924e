//! Transport error types.

use std::time::Duration;

use thiserror::Error;
use tidemcp_core::McpError;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors raised by the duplex channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection establishment timed out.
    #[error("Connection to {url} timed out after {timeout:?}")]
    ConnectionTimeout {
        /// Target URL
        url: String,
        /// The timeout that was exceeded
        timeout: Duration,
    },

    /// The channel is closed; nothing can be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to serialize an outbound message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The target URL or upgrade request was invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for McpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectionClosed => McpError::connection_closed("Connection closed"),
            TransportError::ConnectionTimeout { .. } => {
                McpError::new(tidemcp_core::ErrorKind::RequestTimeout, err.to_string())
            }
            TransportError::InvalidRequest(_) => McpError::configuration(err.to_string()),
            _ => McpError::transport(err.to_string()),
        }
    }
}
