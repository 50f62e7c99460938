//! # FeedSockets core
//!
//! Building blocks for one logical feed connection:
//!
//! - [`session::ConnectionSession`] owns a socket for its lifetime
//! - [`heartbeat::KeepAlive`] sends periodic liveness frames over a session
//! - [`dispatch::spawn_dispatch_thread`] runs the consumer off the socket path
//! - [`connection_state`] holds the lock-free state and counters
//!
//! ## Example
//!
//! ```rust,ignore
//! let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(1024);
//! let dispatch = spawn_dispatch_thread("feed-dispatch", inbound_rx, MyHandler, metrics.clone())?;
//!
//! let session = ConnectionSession::open("wss://feed.example.com", inbound_tx, metrics, &shutdown).await?;
//! let keepalive = KeepAlive::spawn(Arc::clone(&session), Duration::from_secs(18), || {
//!     WsMessage::text(r#"{"type":"ping"}"#)
//! });
//!
//! session.send(WsMessage::text(r#"{"type":"subscribe","topic":"/market/ticker:BTC-USDT"}"#)).await?;
//! session.closed().await;
//! keepalive.stop(Duration::from_secs(1)).await;
//! ```

pub mod connection_state;
pub mod dispatch;
pub mod heartbeat;
pub mod session;

// Re-export main types
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics};
pub use dispatch::{spawn_dispatch_thread, DispatchThread};
pub use heartbeat::KeepAlive;
pub use session::ConnectionSession;
