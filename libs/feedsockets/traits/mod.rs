//! # FeedSockets Traits
//!
//! Core traits and types shared by every layer built on the transport:
//!
//! - **WsMessage**: transport-neutral text/binary payload
//! - **InboundHandler**: consumer of inbound frames, runs on the dispatch thread
//! - **BackoffStrategy**: delay policy between reconnection attempts
//! - **FeedError**: the error taxonomy of the transport

pub mod error;
pub mod inbound;
pub mod message;
pub mod reconnect;

// Re-export commonly used types
pub use error::{FeedError, Result};
pub use inbound::InboundHandler;
pub use message::WsMessage;
pub use reconnect::{BackoffStrategy, ExponentialBackoff, FixedDelay, NeverReconnect};
