//! Desired subscription set
//!
//! The registry is the caller's intent, not the server's state: it survives
//! disconnects and is replayed in full on every new session.

use crate::protocol::{next_message_id, subscription_message, MessageId, RequestKind};
use feedsockets::{ConnectionSession, WsMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// One registered topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub private: bool,
    /// Ask the server for an ack frame
    pub want_ack: bool,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, private: bool, want_ack: bool) -> Self {
        Self {
            topic: topic.into(),
            private,
            want_ack,
        }
    }

    pub fn public(topic: impl Into<String>) -> Self {
        Self::new(topic, false, true)
    }

    pub fn subscribe_message(&self, id: MessageId) -> WsMessage {
        subscription_message(id, RequestKind::Subscribe, &self.topic, self.private, self.want_ack)
    }

    pub fn unsubscribe_message(&self, id: MessageId) -> WsMessage {
        subscription_message(id, RequestKind::Unsubscribe, &self.topic, self.private, self.want_ack)
    }
}

/// Thread-safe set of subscriptions keyed by topic
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert if absent; returns false when the topic was already registered
    pub fn add(&self, subscription: Subscription) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&subscription.topic) {
            return false;
        }
        entries.insert(subscription.topic.clone(), subscription);
        true
    }

    /// Insert or replace, returning the previous entry
    pub fn upsert(&self, subscription: Subscription) -> Option<Subscription> {
        self.entries
            .lock()
            .insert(subscription.topic.clone(), subscription)
    }

    pub fn remove(&self, topic: &str) -> Option<Subscription> {
        self.entries.lock().remove(topic)
    }

    pub fn get(&self, topic: &str) -> Option<Subscription> {
        self.entries.lock().get(topic).cloned()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.lock().contains_key(topic)
    }

    /// Copy of every entry, ordered by topic
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self.entries.lock().values().cloned().collect();
        subs.sort_by(|a, b| a.topic.cmp(&b.topic));
        subs
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Send one subscribe frame per registered topic over `session`
    ///
    /// Stops at the first failed send. Returns the number of frames sent.
    pub async fn replay_all(&self, session: &ConnectionSession) -> feedsockets::Result<usize> {
        let subscriptions = self.snapshot();
        for subscription in &subscriptions {
            let id = next_message_id();
            session.send(subscription.subscribe_message(id)).await?;
            debug!("[KuCoin WS] Replayed {} (id {})", subscription.topic, id);
        }
        Ok(subscriptions.len())
    }
}
