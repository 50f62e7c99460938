use std::fmt::Display;
use thiserror::Error;

/// Main error type for feedsockets
#[derive(Error, Debug)]
pub enum FeedError {
    /// Socket-level failure on open, read or write
    #[error("Transport error during {op}: {cause}")]
    Transport { op: &'static str, cause: String },

    /// The session is not connected (closed by peer, by error or explicitly)
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// A consumer-supplied handler failed
    #[error("Handler error: {0}")]
    Handler(String),
}

impl FeedError {
    /// Build a transport error tagged with the operation that failed
    pub fn transport(op: &'static str, cause: impl Display) -> Self {
        FeedError::Transport {
            op,
            cause: cause.to_string(),
        }
    }

    /// True when the error only says the session is gone
    pub fn is_closed(&self) -> bool {
        matches!(self, FeedError::ConnectionClosed(_))
    }
}

/// Result type for feedsockets operations
pub type Result<T> = std::result::Result<T, FeedError>;
