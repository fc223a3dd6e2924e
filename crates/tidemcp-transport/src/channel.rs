//! Transport-agnostic view of one duplex connection.
//!
//! A [`Channel`] is produced by a backend (see [`crate::websocket`]) and is
//! split into a cloneable [`ChannelHandle`] for writing and a stream of
//! [`Inbound`] events for reading. Exactly one [`Inbound::Closed`] is
//! delivered per channel, after which the inbound stream ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tidemcp_core::Message;
use tokio::sync::mpsc;

use crate::error::{TransportError, TransportResult};

/// Frame queued for the send loop
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Protocol message, sent as a text frame
    Message(Message),
    /// Transport-level ping
    Ping,
    /// Close the connection with a code and reason
    Close {
        /// WebSocket close code
        code: u16,
        /// Human-readable reason
        reason: String,
    },
}

/// How a channel ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code (1006 when the socket dropped without a close frame)
    pub code: u16,
    /// Close reason
    pub reason: String,
}

impl CloseInfo {
    /// Build a close record
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Whether the close was a clean 1000
    pub fn is_normal(&self) -> bool {
        tidemcp_core::close_codes::is_normal(self.code)
    }
}

/// Event produced by the receive loop
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Well-formed protocol message
    Message(Message),
    /// Text frame that is not a valid message
    Malformed {
        /// Raw frame text
        raw: String,
        /// Why parsing failed
        error: String,
    },
    /// Peer sent a ping (answered by the WebSocket backend)
    Ping,
    /// Peer answered one of our pings
    Pong,
    /// Connection ended; always the last event
    Closed(CloseInfo),
}

/// Cloneable write half of a channel
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Outbound>, open: Arc<AtomicBool>) -> Self {
        Self { outbound, open }
    }

    /// Handle that is not backed by a socket
    ///
    /// Frames are delivered to the returned receiver, which lets in-process
    /// code and tests observe what would have been written.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, Arc::new(AtomicBool::new(true))), rx)
    }

    /// Queue a message for sending
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the channel has been
    /// closed locally or by the peer.
    pub fn send(&self, message: Message) -> TransportResult<()> {
        self.push(Outbound::Message(message))
    }

    /// Queue a transport-level ping
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the channel is closed.
    pub fn ping(&self) -> TransportResult<()> {
        self.push(Outbound::Ping)
    }

    /// Close the channel. Only the first call has an effect.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close {
                code,
                reason: reason.into(),
            });
        }
    }

    /// Whether the channel still accepts outbound frames
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    fn push(&self, frame: Outbound) -> TransportResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

/// One duplex connection
#[derive(Debug)]
pub struct Channel {
    handle: ChannelHandle,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl Channel {
    pub(crate) fn new(handle: ChannelHandle, inbound: mpsc::UnboundedReceiver<Inbound>) -> Self {
        Self { handle, inbound }
    }

    /// A new write handle for this channel
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Next inbound event; `None` after [`Inbound::Closed`] was delivered
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Split into the write handle and the inbound receiver
    pub fn into_parts(self) -> (ChannelHandle, mpsc::UnboundedReceiver<Inbound>) {
        (self.handle, self.inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_sent_once_and_blocks_sends() {
        let (handle, mut rx) = ChannelHandle::detached();

        handle.send(Message::notification("heartbeat", None)).unwrap();
        handle.close(1000, "bye");
        handle.close(1001, "again");

        assert!(!handle.is_open());
        assert_eq!(
            handle.send(Message::notification("heartbeat", None)),
            Err(TransportError::ConnectionClosed)
        );
        assert!(handle.ping().is_err());

        assert!(matches!(rx.try_recv(), Ok(Outbound::Message(_))));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: 1000,
                reason: "bye".into()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_fails_when_pump_is_gone() {
        let (handle, rx) = ChannelHandle::detached();
        drop(rx);
        assert!(!handle.is_open());
        assert!(handle.send(Message::request("listTools", None)).is_err());
    }
}
