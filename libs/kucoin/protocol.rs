//! KuCoin WebSocket wire protocol
//!
//! Outbound frames are JSON text:
//!
//! ```text
//! {"id": 1700000000000, "type": "subscribe",   "topic": "/market/ticker:BTC-USDT", "privateChannel": false, "response": true}
//! {"id": 1700000000001, "type": "unsubscribe", "topic": "/market/ticker:BTC-USDT", "privateChannel": false, "response": true}
//! {"id": 1700000000002, "type": "ping"}
//! ```
//!
//! Inbound frames are classified by their `type` field; anything that is
//! not `welcome`, `pong` or `ack` is data for the caller.

use feedsockets::WsMessage;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};

/// Correlation id of an outbound frame: a millisecond timestamp, bumped when
/// two frames are built within the same millisecond
pub type MessageId = i64;

static LAST_MESSAGE_ID: AtomicI64 = AtomicI64::new(0);

/// Next strictly increasing message id
pub fn next_message_id() -> MessageId {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_MESSAGE_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_MESSAGE_ID.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Kind of subscription request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Subscribe => "subscribe",
            RequestKind::Unsubscribe => "unsubscribe",
        }
    }
}

/// Build a subscribe/unsubscribe frame
pub fn subscription_message(
    id: MessageId,
    kind: RequestKind,
    topic: &str,
    private_channel: bool,
    response: bool,
) -> WsMessage {
    WsMessage::Text(
        json!({
            "id": id,
            "type": kind.as_str(),
            "topic": topic,
            "privateChannel": private_channel,
            "response": response,
        })
        .to_string(),
    )
}

/// Build a keepalive ping with a fresh id
pub fn ping_message() -> WsMessage {
    WsMessage::Text(json!({ "id": next_message_id(), "type": "ping" }).to_string())
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake completed; `id` echoes the connectId
    Welcome { id: Option<String> },
    /// Reply to a keepalive ping
    Pong { id: Option<String> },
    /// Acknowledgement of a request sent with `"response": true`
    Ack { id: Option<String> },
    /// Topic message for the caller
    Data { topic: String, payload: Value },
    /// Valid JSON of any other shape, forwarded as-is
    Unknown(Value),
    /// Payload that is not valid JSON
    Malformed { raw: String, reason: String },
}

impl Frame {
    /// Classify a raw text frame. Never fails: bad input becomes `Malformed`.
    pub fn parse(text: &str) -> Frame {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return Frame::Malformed {
                    raw: text.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let Some(object) = value.as_object() else {
            return Frame::Unknown(value);
        };

        match object.get("type").and_then(Value::as_str) {
            Some("welcome") => Frame::Welcome { id: id_field(object) },
            Some("pong") => Frame::Pong { id: id_field(object) },
            Some("ack") => Frame::Ack { id: id_field(object) },
            _ => match object.get("topic").and_then(Value::as_str) {
                Some(topic) => Frame::Data {
                    topic: topic.to_string(),
                    payload: value.clone(),
                },
                None => Frame::Unknown(value.clone()),
            },
        }
    }

    /// Classify a transport message; binary payloads are decoded as UTF-8
    pub fn from_ws(message: &WsMessage) -> Frame {
        match message.to_text_lossless() {
            Some(text) => Frame::parse(text),
            None => Frame::Malformed {
                raw: format!("<{} bytes of binary>", message.payload_len()),
                reason: "binary frame is not valid UTF-8".to_string(),
            },
        }
    }

    /// Frames the caller's handler receives
    pub fn is_data(&self) -> bool {
        matches!(self, Frame::Data { .. } | Frame::Unknown(_))
    }
}

/// The server echoes ids as strings; numbers are accepted too
fn id_field(object: &Map<String, Value>) -> Option<String> {
    match object.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
