//! One physical WebSocket connection
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!  send() ───────>│ writer: Mutex<SplitSink> │──> socket
//!  (keepalive,    └──────────────────────────┘
//!   caller)
//!                 ┌──────────────────────────┐
//!  socket ───────>│ reader task (owner)      │──> bounded inbound channel
//!                 └──────────────────────────┘
//! ```
//!
//! Writes are serialized by a single async mutex, so a ping and a subscribe
//! frame never interleave. The read half has exactly one owner and needs no
//! lock. Both halves observe the session's cancellation token, which is a
//! child of the caller's token: cancelling either unblocks a pending read.

use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::traits::{FeedError, Result, WsMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Upper bound for the close handshake and the reader join
const CLOSE_GRACE: Duration = Duration::from_secs(1);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Owner of one socket for its whole lifetime
pub struct ConnectionSession {
    id: u64,
    endpoint: String,
    writer: tokio::sync::Mutex<WsSink>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Perform the handshake and start the receive loop
    ///
    /// Every text or binary message is forwarded into `inbound`. Transport
    /// control frames are handled here and never forwarded. The receive loop
    /// ends when the peer closes, on a read error, when [`close`](Self::close)
    /// is called or when `parent` is cancelled.
    pub async fn open(
        url: &str,
        inbound: mpsc::Sender<WsMessage>,
        metrics: Arc<AtomicMetrics>,
        parent: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let endpoint = redact(url);
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!("[session {}] Opening connection to {}", id, endpoint);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| FeedError::transport("open", e))?;
        let (write, read) = ws_stream.split();

        let state = Arc::new(AtomicConnectionState::new(ConnectionState::Connected));
        let cancel = parent.child_token();

        let reader = tokio::spawn(read_loop(
            id,
            read,
            inbound,
            Arc::clone(&state),
            Arc::clone(&metrics),
            cancel.clone(),
        ));

        info!("[session {}] Connected to {}", id, endpoint);

        Ok(Arc::new(Self {
            id,
            endpoint,
            writer: tokio::sync::Mutex::new(write),
            state,
            metrics,
            cancel,
            reader: Mutex::new(Some(reader)),
        }))
    }

    /// Write one message on the wire
    ///
    /// Returns [`FeedError::ConnectionClosed`] without touching the socket when
    /// the session is no longer connected, and as soon as the session is
    /// cancelled while the write is still pending. A write failure marks the
    /// session closed so the owner's reconnect path takes over.
    pub async fn send(&self, message: WsMessage) -> Result<()> {
        if !self.state.is_connected() {
            return Err(FeedError::ConnectionClosed(format!("session {}", self.id)));
        }

        let write = async {
            let mut writer = self.writer.lock().await;
            writer.send(to_tungstenite(message)).await
        };
        let written = tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("[session {}] Write abandoned, session cancelled", self.id);
                return Err(FeedError::ConnectionClosed(format!("session {}", self.id)));
            }
            written = write => written,
        };

        if let Err(e) = written {
            warn!("[session {}] Write failed: {}", self.id, e);
            self.state.set(ConnectionState::Disconnected);
            self.cancel.cancel();
            return Err(FeedError::transport("send", e));
        }

        self.metrics.increment_sent();
        Ok(())
    }

    /// Close the session
    ///
    /// Idempotent: only the first call on a connected session performs the
    /// close handshake, later calls and calls on a dead session return at once.
    pub async fn close(&self) {
        if !self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            self.cancel.cancel();
            return;
        }

        debug!("[session {}] Closing", self.id);
        self.cancel.cancel();

        match tokio::time::timeout(CLOSE_GRACE, self.writer.lock()).await {
            Ok(mut writer) => {
                let _ = writer.send(Message::Close(None)).await;
                let _ = writer.close().await;
            }
            Err(_) => warn!("[session {}] Writer busy, dropping without close frame", self.id),
        }

        self.state.set(ConnectionState::Disconnected);

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            if tokio::time::timeout(CLOSE_GRACE, handle).await.is_err() {
                warn!("[session {}] Reader did not stop within {:?}", self.id, CLOSE_GRACE);
            }
        }

        info!("[session {}] Closed", self.id);
    }

    /// Resolves once the session has terminated for any reason
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Token cancelled when this session terminates
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Endpoint with the query string stripped
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Receive loop: sole owner of the read half
async fn read_loop(
    id: u64,
    mut read: WsSource,
    inbound: mpsc::Sender<WsMessage>,
    state: Arc<AtomicConnectionState>,
    metrics: Arc<AtomicMetrics>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[session {}] Reader cancelled", id);
                break;
            }
            next = read.next() => next,
        };

        match next {
            Some(Ok(Message::Close(frame))) => {
                info!("[session {}] Closed by peer: {:?}", id, frame);
                break;
            }
            Some(Ok(msg)) => {
                let Some(ws_msg) = from_tungstenite(msg) else {
                    continue;
                };
                metrics.increment_received();

                // Backpressure: a slow consumer stalls reads, never writes
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = inbound.send(ws_msg) => {
                        if sent.is_err() {
                            debug!("[session {}] Inbound channel closed", id);
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                warn!("[session {}] Transport error during read: {}", id, e);
                break;
            }
            None => {
                warn!("[session {}] WebSocket stream closed", id);
                break;
            }
        }
    }

    if !state.is_closing() {
        state.set(ConnectionState::Disconnected);
    }
    cancel.cancel();
}

/// Strip the query string, which carries the session token
fn redact(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

/// Convert WsMessage to tungstenite Message
fn to_tungstenite(msg: WsMessage) -> Message {
    match msg {
        WsMessage::Text(text) => Message::Text(text),
        WsMessage::Binary(data) => Message::Binary(data),
    }
}

/// Convert tungstenite Message to WsMessage
fn from_tungstenite(msg: Message) -> Option<WsMessage> {
    match msg {
        Message::Text(text) => Some(WsMessage::Text(text)),
        Message::Binary(data) => Some(WsMessage::Binary(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_strips_token() {
        assert_eq!(
            redact("wss://ws-api-spot.kucoin.com/?token=abc&connectId=1"),
            "wss://ws-api-spot.kucoin.com/"
        );
        assert_eq!(redact("ws://127.0.0.1:9000"), "ws://127.0.0.1:9000");
    }

    #[test]
    fn test_control_frames_not_forwarded() {
        assert!(from_tungstenite(Message::Ping(vec![1])).is_none());
        assert!(from_tungstenite(Message::Pong(vec![])).is_none());
        assert_eq!(
            from_tungstenite(Message::Text("x".into())),
            Some(WsMessage::Text("x".into()))
        );
    }
}
