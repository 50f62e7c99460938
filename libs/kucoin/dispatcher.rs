//! Inbound frame classification and delivery
//!
//! ```text
//! inbound channel ──> FrameDispatcher ──┬─ welcome  → info log
//!  (dispatch thread)                    ├─ pong     → dropped
//!                                       ├─ ack      → debug log
//!                                       ├─ malformed→ warn + counter
//!                                       └─ data     → MarketDataHandler
//! ```

use crate::protocol::Frame;
use feedsockets::{AtomicMetrics, FeedError, InboundHandler, Result, WsMessage};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Payload delivered to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Topic of the frame; `None` for frames without one (e.g. error frames)
    pub topic: Option<String>,
    /// The complete decoded frame
    pub payload: Value,
}

impl DataMessage {
    /// `subject` field, e.g. `trade.ticker`
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("subject").and_then(Value::as_str)
    }

    /// `data` field, where KuCoin puts the market data itself
    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }
}

/// Caller-supplied consumer of data frames
///
/// Runs on the dispatch thread, in arrival order. Errors and panics are
/// logged and counted; the next frame is delivered regardless.
pub trait MarketDataHandler: Send + 'static {
    fn handle(&mut self, message: DataMessage) -> Result<()>;
}

impl<F> MarketDataHandler for F
where
    F: FnMut(DataMessage) -> Result<()> + Send + 'static,
{
    fn handle(&mut self, message: DataMessage) -> Result<()> {
        self(message)
    }
}

/// What happened to one inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Welcome,
    Pong,
    Ack,
    Malformed,
}

/// Routes parsed frames to logging or to the caller's handler
pub struct FrameDispatcher<H> {
    handler: H,
    metrics: Arc<AtomicMetrics>,
}

impl<H: MarketDataHandler> FrameDispatcher<H> {
    pub fn new(handler: H, metrics: Arc<AtomicMetrics>) -> Self {
        Self { handler, metrics }
    }

    /// Classify one frame and act on it
    ///
    /// Only a handler failure is returned as an error; bad frames are
    /// counted and reported through [`DispatchOutcome::Malformed`].
    pub fn dispatch(&mut self, message: WsMessage) -> Result<DispatchOutcome> {
        match Frame::from_ws(&message) {
            Frame::Welcome { id } => {
                info!("[KuCoin WS] Welcome received (connectId {})", id.as_deref().unwrap_or("?"));
                Ok(DispatchOutcome::Welcome)
            }
            Frame::Pong { id } => {
                trace!("[KuCoin WS] Pong {:?}", id);
                Ok(DispatchOutcome::Pong)
            }
            Frame::Ack { id } => {
                debug!("[KuCoin WS] Ack for request {}", id.as_deref().unwrap_or("?"));
                Ok(DispatchOutcome::Ack)
            }
            Frame::Malformed { raw, reason } => {
                self.metrics.increment_malformed();
                warn!("[KuCoin WS] Dropping malformed frame ({}): {}", reason, truncate(&raw, 200));
                Ok(DispatchOutcome::Malformed)
            }
            Frame::Data { topic, payload } => {
                self.deliver(DataMessage {
                    topic: Some(topic),
                    payload,
                })
            }
            Frame::Unknown(payload) => {
                if payload.get("type").and_then(Value::as_str) == Some("error") {
                    warn!("[KuCoin WS] Server error frame: {}", payload);
                }
                self.deliver(DataMessage {
                    topic: None,
                    payload,
                })
            }
        }
    }

    fn deliver(&mut self, message: DataMessage) -> Result<DispatchOutcome> {
        self.handler.handle(message)?;
        Ok(DispatchOutcome::Delivered)
    }
}

impl<H: MarketDataHandler> InboundHandler for FrameDispatcher<H> {
    fn on_message(&mut self, message: WsMessage) -> Result<()> {
        self.dispatch(message).map(|_| ())
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Shorthand for handler code that wants to reject a message
pub fn handler_error(message: impl Into<String>) -> FeedError {
    FeedError::Handler(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_dispatcher() -> (
        FrameDispatcher<impl MarketDataHandler>,
        Arc<Mutex<Vec<DataMessage>>>,
        Arc<AtomicMetrics>,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let metrics = Arc::new(AtomicMetrics::new());
        let dispatcher = FrameDispatcher::new(
            move |msg: DataMessage| -> Result<()> {
                sink.lock().push(msg);
                Ok(())
            },
            Arc::clone(&metrics),
        );
        (dispatcher, seen, metrics)
    }

    #[test]
    fn test_malformed_then_data() {
        let (mut dispatcher, seen, metrics) = recording_dispatcher();

        assert_eq!(
            dispatcher.dispatch(WsMessage::text("{not json")).unwrap(),
            DispatchOutcome::Malformed
        );
        assert_eq!(
            dispatcher
                .dispatch(WsMessage::text(r#"{"topic":"t","data":{}}"#))
                .unwrap(),
            DispatchOutcome::Delivered
        );

        assert_eq!(metrics.malformed_frames(), 1);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].topic.as_deref(), Some("t"));
        assert_eq!(seen[0].data(), Some(&serde_json::json!({})));
    }

    #[test]
    fn test_control_frames_are_not_delivered() {
        let (mut dispatcher, seen, _) = recording_dispatcher();

        let outcomes: Vec<DispatchOutcome> = [
            r#"{"id":"abc","type":"welcome"}"#,
            r#"{"id":"1","type":"pong"}"#,
            r#"{"id":"2","type":"ack"}"#,
        ]
        .iter()
        .map(|text| dispatcher.dispatch(WsMessage::text(*text)).unwrap())
        .collect();

        assert_eq!(
            outcomes,
            vec![DispatchOutcome::Welcome, DispatchOutcome::Pong, DispatchOutcome::Ack]
        );
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_unknown_frames_are_forwarded_without_topic() {
        let (mut dispatcher, seen, _) = recording_dispatcher();

        dispatcher
            .dispatch(WsMessage::text(r#"{"id":"1","type":"error","code":404,"data":"topic not found"}"#))
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].topic.is_none());
        assert_eq!(seen[0].payload["code"], 404);
    }

    #[test]
    fn test_handler_error_is_returned() {
        let mut dispatcher = FrameDispatcher::new(
            |_msg: DataMessage| -> Result<()> { Err(handler_error("nope")) },
            Arc::new(AtomicMetrics::new()),
        );

        let err = dispatcher
            .on_message(WsMessage::text(r#"{"topic":"t","subject":"s","data":1}"#))
            .unwrap_err();
        assert!(matches!(err, FeedError::Handler(_)));
    }

    #[test]
    fn test_binary_json_is_decoded() {
        let (mut dispatcher, seen, _) = recording_dispatcher();
        let payload = br#"{"topic":"/market/level2:BTC-USDT","subject":"trade.l2update","data":{}}"#;

        dispatcher.dispatch(WsMessage::Binary(payload.to_vec())).unwrap();

        assert_eq!(seen.lock()[0].subject(), Some("trade.l2update"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
