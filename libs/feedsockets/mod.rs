//! # FeedSockets
//!
//! Transport core for long-lived exchange feeds: one socket per session,
//! serialized writes, an independent reader, a keepalive timer and a
//! dedicated dispatch thread that keeps slow consumers away from the socket.
//!
//! ## Features
//!
//! - **Single writer lock**: keepalive pings and caller frames never interleave
//! - **Session-scoped cancellation**: closing a session stops its reader and keepalive
//! - **Bounded inbound channel**: reader and consumer are decoupled, with backpressure
//! - **Pluggable backoff**: fixed, exponential or never-reconnect strategies

pub mod core;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use core::{
    connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState, Metrics},
    dispatch::{spawn_dispatch_thread, DispatchThread},
    heartbeat::KeepAlive,
    session::ConnectionSession,
};

/// Type alias for Result with FeedError
pub type Result<T> = std::result::Result<T, traits::FeedError>;
