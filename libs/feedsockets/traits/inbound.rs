//! Inbound message consumption
//!
//! ```text
//! Socket → Reader Task → Bounded Channel → Dispatch Thread → InboundHandler
//!                             ↑
//!                  (backpressure on the reader only;
//!                   writes and keepalive are unaffected)
//! ```

use crate::{Result, WsMessage};

/// Consumer of inbound messages
///
/// Runs on a dedicated OS thread and receives messages in arrival order.
/// It may block without stalling the socket writer or the keepalive timer.
///
/// # Errors
/// Returned errors are logged and counted by the dispatch thread, which then
/// continues with the next message. Panics are caught the same way.
pub trait InboundHandler: Send + 'static {
    fn on_message(&mut self, message: WsMessage) -> Result<()>;
}

impl<H: InboundHandler + ?Sized> InboundHandler for Box<H> {
    fn on_message(&mut self, message: WsMessage) -> Result<()> {
        (**self).on_message(message)
    }
}
