//! WebSocket pump shared by the client connector and the axum adapter.
//!
//! ```text
//!   ChannelHandle ──► outbound mpsc ──► send_loop ──► sink
//!                                                      │ socket
//!   Inbound mpsc ◄── receive_loop ◄──────────────── stream
//! ```
//!
//! Both backends expose the same shape (a `Stream` of frames plus a `Sink`
//! of frames); [`WsFrame`] bridges their message types so the loops are
//! written once.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tidemcp_core::{Message, close_codes};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelHandle, CloseInfo, Inbound, Outbound};

/// How long to wait for the peer's side of the close handshake
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Backend-neutral classification of a received frame
#[derive(Debug)]
pub(crate) enum FrameEvent {
    Text(String),
    Ping,
    Pong,
    Close(Option<CloseInfo>),
    Ignored,
}

/// Conversion between a backend's message type and the pump's frames
pub(crate) trait WsFrame: Sized + Send + 'static {
    fn text(payload: String) -> Self;
    fn ping(payload: Bytes) -> Self;
    fn close(code: u16, reason: String) -> Self;
    fn into_event(self) -> FrameEvent;
}

type LocalClose = Arc<Mutex<Option<CloseInfo>>>;

/// Start the send and receive loops for `socket` and return its channel.
pub(crate) fn spawn<S, F, E>(socket: S) -> Channel
where
    S: Stream<Item = Result<F, E>> + Sink<F, Error = E> + Send + 'static,
    F: WsFrame,
    E: Display + Send + 'static,
{
    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));
    let closing = CancellationToken::new();
    let local_close: LocalClose = Arc::new(Mutex::new(None));

    let send_task = tokio::spawn(send_loop::<_, F>(
        sink,
        outbound_rx,
        closing.clone(),
        Arc::clone(&local_close),
    ));

    let open_flag = Arc::clone(&open);
    tokio::spawn(async move {
        let mut stream = stream;
        let info = receive_loop(&mut stream, &inbound_tx, &closing, &local_close).await;
        open_flag.store(false, Ordering::Release);
        tracing::debug!(code = info.code, reason = %info.reason, "WebSocket channel closed");
        let _ = inbound_tx.send(Inbound::Closed(info));

        // Let the backend finish the close handshake before tearing down.
        let _ = tokio::time::timeout(CLOSE_GRACE, async {
            while stream.next().await.is_some() {}
        })
        .await;
        send_task.abort();
    });

    Channel::new(ChannelHandle::new(outbound_tx, open), inbound_rx)
}

/// Send loop: forwards queued frames to the socket
async fn send_loop<K, F>(
    mut sink: K,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    closing: CancellationToken,
    local_close: LocalClose,
) where
    K: Sink<F> + Unpin,
    K::Error: Display,
    F: WsFrame,
{
    while let Some(frame) = outbound_rx.recv().await {
        let ws_frame = match frame {
            Outbound::Message(message) => match message.to_json() {
                Ok(text) => F::text(text),
                Err(e) => {
                    tracing::error!(id = %message.id, error = %e, "Dropping unserializable message");
                    continue;
                }
            },
            Outbound::Ping => F::ping(Bytes::new()),
            Outbound::Close { code, reason } => {
                *local_close.lock() = Some(CloseInfo::new(code, reason.clone()));
                if let Err(e) = sink.send(F::close(code, reason)).await {
                    tracing::debug!(error = %e, "Failed to send close frame");
                }
                break;
            }
        };

        if let Err(e) = sink.send(ws_frame).await {
            tracing::warn!(error = %e, "Failed to send WebSocket frame");
            break;
        }
    }
    closing.cancel();
}

/// Receive loop: classifies frames until the connection ends
async fn receive_loop<R, F, E>(
    stream: &mut R,
    inbound_tx: &mpsc::UnboundedSender<Inbound>,
    closing: &CancellationToken,
    local_close: &Mutex<Option<CloseInfo>>,
) -> CloseInfo
where
    R: Stream<Item = Result<F, E>> + Unpin,
    F: WsFrame,
    E: Display,
{
    let dropped = |reason: String| {
        local_close
            .lock()
            .take()
            .unwrap_or_else(|| CloseInfo::new(close_codes::ABNORMAL, reason))
    };

    loop {
        let next = if closing.is_cancelled() {
            match tokio::time::timeout(CLOSE_GRACE, stream.next()).await {
                Ok(next) => next,
                Err(_) => return dropped("close handshake timed out".to_string()),
            }
        } else {
            tokio::select! {
                next = stream.next() => next,
                () = closing.cancelled() => continue,
            }
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "WebSocket error");
                return dropped(e.to_string());
            }
            None => return dropped("connection dropped".to_string()),
        };

        let event = match frame.into_event() {
            // Send side has finished; nothing could answer a late request.
            FrameEvent::Text(_) if closing.is_cancelled() => {
                tracing::debug!("Dropping text frame received after local close");
                continue;
            }
            FrameEvent::Text(raw) => match Message::parse(&raw) {
                Ok(message) => Inbound::Message(message),
                Err(e) => Inbound::Malformed {
                    raw,
                    error: e.message,
                },
            },
            // Both backends queue the pong themselves when reading a ping.
            FrameEvent::Ping => Inbound::Ping,
            FrameEvent::Pong => Inbound::Pong,
            FrameEvent::Close(info) => {
                return info.unwrap_or_else(|| CloseInfo::new(close_codes::NO_STATUS, ""));
            }
            FrameEvent::Ignored => continue,
        };
        let _ = inbound_tx.send(event);
    }
}

#[cfg(feature = "client")]
impl WsFrame for tokio_tungstenite::tungstenite::Message {
    fn text(payload: String) -> Self {
        Self::Text(payload.into())
    }

    fn ping(payload: Bytes) -> Self {
        Self::Ping(payload)
    }

    fn close(code: u16, reason: String) -> Self {
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        Self::Close(Some(CloseFrame {
            code: code.into(),
            reason: reason.into(),
        }))
    }

    fn into_event(self) -> FrameEvent {
        match self {
            Self::Text(text) => FrameEvent::Text(text.as_str().to_owned()),
            Self::Ping(_) => FrameEvent::Ping,
            Self::Pong(_) => FrameEvent::Pong,
            Self::Close(frame) => FrameEvent::Close(
                frame.map(|f| CloseInfo::new(u16::from(f.code), f.reason.as_str())),
            ),
            Self::Binary(_) | Self::Frame(_) => FrameEvent::Ignored,
        }
    }
}

#[cfg(feature = "server")]
impl WsFrame for axum::extract::ws::Message {
    fn text(payload: String) -> Self {
        Self::Text(payload.into())
    }

    fn ping(payload: Bytes) -> Self {
        Self::Ping(payload)
    }

    fn close(code: u16, reason: String) -> Self {
        Self::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    fn into_event(self) -> FrameEvent {
        match self {
            Self::Text(text) => FrameEvent::Text(text.as_str().to_owned()),
            Self::Ping(_) => FrameEvent::Ping,
            Self::Pong(_) => FrameEvent::Pong,
            Self::Close(frame) => {
                FrameEvent::Close(frame.map(|f| CloseInfo::new(f.code, f.reason.as_str())))
            }
            Self::Binary(_) => FrameEvent::Ignored,
        }
    }
}

#[cfg(all(test, feature = "client"))]
mod tests {
    use super::*;
    use futures::SinkExt;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn raw_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        tokio::join!(
            WebSocketStream::from_raw_socket(a, Role::Server, None),
            WebSocketStream::from_raw_socket(b, Role::Client, None),
        )
    }

    async fn next_event(channel: &mut Channel) -> Inbound {
        tokio::time::timeout(Duration::from_secs(5), channel.recv())
            .await
            .expect("timed out waiting for inbound event")
            .expect("inbound stream ended")
    }

    async fn next_non_ping(channel: &mut Channel) -> Inbound {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), channel.recv())
                .await
                .expect("timed out waiting for inbound event")
                .expect("inbound stream ended");
            if !matches!(event, Inbound::Ping | Inbound::Pong) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_message_crosses_the_channel() {
        let (server, client) = raw_pair().await;
        let mut server = spawn(server);
        let client = spawn(client);

        let request = Message::request("listTools", None);
        client.handle().send(request.clone()).unwrap();

        match next_non_ping(&mut server).await {
            Inbound::Message(received) => {
                assert_eq!(received.id, request.id);
                assert_eq!(received.method_name(), "listTools");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_is_reported_not_fatal() {
        let (server, mut client) = raw_pair().await;
        let mut server = spawn(server);

        client.send(WsMessage::text("definitely not json")).await.unwrap();
        match next_non_ping(&mut server).await {
            Inbound::Malformed { raw, .. } => assert_eq!(raw, "definitely not json"),
            other => panic!("unexpected event: {other:?}"),
        }

        let ok = Message::notification("heartbeat", None);
        client
            .send(WsMessage::text(ok.to_json().unwrap()))
            .await
            .unwrap();
        assert!(matches!(next_non_ping(&mut server).await, Inbound::Message(_)));
    }

    #[tokio::test]
    async fn test_close_code_reaches_both_sides() {
        let (server, client) = raw_pair().await;
        let mut server = spawn(server);
        let mut client = spawn(client);

        server.handle().close(1008, "policy violation");

        match next_non_ping(&mut client).await {
            Inbound::Closed(info) => {
                assert_eq!(info.code, 1008);
                assert_eq!(info.reason, "policy violation");
                assert!(!info.is_normal());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match next_non_ping(&mut server).await {
            Inbound::Closed(info) => assert_eq!(info.code, 1008),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!server.handle().is_open());
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_socket_is_abnormal() {
        let (server, client) = raw_pair().await;
        let mut server = spawn(server);
        drop(client);

        match next_non_ping(&mut server).await {
            Inbound::Closed(info) => assert_eq!(info.code, close_codes::ABNORMAL),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (server, client) = raw_pair().await;
        let mut server = spawn(server);
        let mut client = spawn(client);

        client.handle().ping().unwrap();

        let pong = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(Inbound::Pong) = client.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(pong.is_ok());
        assert_eq!(server.recv().await, Some(Inbound::Ping));
    }

    #[tokio::test]
    async fn test_ping_gets_exactly_one_pong() {
        let (server, mut client) = raw_pair().await;
        let mut server = spawn(server);

        client
            .send(WsMessage::Ping(Bytes::from_static(b"once")))
            .await
            .unwrap();
        assert_eq!(next_event(&mut server).await, Inbound::Ping);

        let mut pongs = 0;
        while let Ok(Some(Ok(frame))) =
            tokio::time::timeout(Duration::from_millis(300), client.next()).await
        {
            if let WsMessage::Pong(payload) = frame {
                assert_eq!(payload.as_ref(), b"once");
                pongs += 1;
            }
        }
        assert_eq!(pongs, 1);
    }
}
