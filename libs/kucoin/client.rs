//! Public client surface
//!
//! ```text
//!  caller ── subscribe/unsubscribe ──> link lock ──> registry + active session
//!                                          ^
//!  supervisor task ── replay on connect ───┘
//!
//!  session reader ──> bounded channel ──> dispatch thread ──> FrameDispatcher ──> handler
//! ```

use crate::dispatcher::{FrameDispatcher, MarketDataHandler};
use crate::protocol::{next_message_id, MessageId};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::supervisor::{AtomicSupervisorState, ReconnectSupervisor, SessionLink, SupervisorState};
use crate::token::{ChannelMode, SessionTokenProvider};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use feedsockets::{
    spawn_dispatch_thread, AtomicMetrics, BackoffStrategy, ConnectionSession, DispatchThread, FixedDelay,
    InboundHandler, Metrics, WsMessage,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle notifications, delivered in order on a bounded queue
///
/// When the queue is full the oldest pending event is discarded, so a caller
/// that never drains events costs at most `event_buffer` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A session is up and subscriptions were replayed; `attempt` counts
    /// tries since the last successful connection
    Connected { attempt: usize },
    /// The active session ended
    Disconnected,
    /// Waiting before reconnect attempt `n`
    Reconnecting(usize),
    /// A connection attempt failed
    Error(String),
    /// The supervisor exited; no further events follow
    Stopped,
}

/// Result of [`KucoinStreamClient::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Written to the active session with this message id
    Sent(MessageId),
    /// Topic already registered; nothing sent
    AlreadySubscribed,
    /// Registered while disconnected; sent on the next connect
    Queued,
}

impl SubscribeOutcome {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            SubscribeOutcome::Sent(id) => Some(*id),
            _ => None,
        }
    }
}

/// Result of [`KucoinStreamClient::unsubscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Removed and written to the active session with this message id
    Sent(MessageId),
    /// Removed while disconnected; nothing sent
    Removed,
    /// Topic was not registered; nothing sent
    NotFound,
}

impl UnsubscribeOutcome {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            UnsubscribeOutcome::Sent(id) => Some(*id),
            _ => None,
        }
    }
}

/// Client tuning
#[derive(Clone)]
pub struct ClientOptions {
    pub mode: ChannelMode,
    pub backoff: Arc<dyn BackoffStrategy>,
    /// Capacity of the reader-to-dispatch channel
    pub inbound_buffer: usize,
    /// Bound for each join during [`KucoinStreamClient::disconnect`]
    pub shutdown_timeout: Duration,
    /// Used when the token response carries no ping interval
    pub default_ping_interval: Duration,
    /// Capacity of the lifecycle event queue
    pub event_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            mode: ChannelMode::Public,
            backoff: Arc::new(FixedDelay::new(Duration::from_secs(3))),
            inbound_buffer: 1024,
            shutdown_timeout: Duration::from_secs(1),
            default_ping_interval: Duration::from_millis(30_000),
            event_buffer: 256,
        }
    }
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("mode", &self.mode)
            .field("backoff_first_delay", &self.backoff.next_delay(0))
            .field("inbound_buffer", &self.inbound_buffer)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("default_ping_interval", &self.default_ping_interval)
            .field("event_buffer", &self.event_buffer)
            .finish()
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ChannelMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_inbound_buffer(mut self, capacity: usize) -> Self {
        self.inbound_buffer = capacity.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_default_ping_interval(mut self, interval: Duration) -> Self {
        self.default_ping_interval = interval;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}

/// Bounded event queue that evicts the oldest entry when full
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    tx: Sender<ClientEvent>,
    rx: Receiver<ClientEvent>,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let mut pending = event;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(event)) => {
                    if let Ok(evicted) = self.rx.try_recv() {
                        debug!("[KuCoin WS] Event queue full, dropped {:?}", evicted);
                    }
                    pending = event;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn receiver(&self) -> &Receiver<ClientEvent> {
        &self.rx
    }
}

/// Background pieces started by `connect()`
struct Runtime {
    /// Present until the dispatch thread takes it
    handler: Option<Box<dyn InboundHandler>>,
    supervisor: Option<JoinHandle<()>>,
    dispatch: Option<DispatchThread>,
}

/// Persistent KuCoin market-data stream
///
/// # Example
///
/// ```rust,ignore
/// let provider = Arc::new(RestTokenProvider::new("https://api.kucoin.com")?);
/// let client = KucoinStreamClient::new(provider, |msg: DataMessage| {
///     println!("{:?}", msg.data());
///     Ok(())
/// }, ClientOptions::default());
///
/// client.subscribe("/market/ticker:BTC-USDT", false, true).await;
/// client.connect().await;
/// // ...
/// client.disconnect().await;
/// ```
pub struct KucoinStreamClient {
    provider: Arc<dyn SessionTokenProvider>,
    options: ClientOptions,
    registry: Arc<SubscriptionRegistry>,
    link: Arc<SessionLink>,
    state: Arc<AtomicSupervisorState>,
    metrics: Arc<AtomicMetrics>,
    events: EventQueue,
    shutdown: CancellationToken,
    connect_id: String,
    runtime: Mutex<Runtime>,
}

impl KucoinStreamClient {
    pub fn new(
        provider: Arc<dyn SessionTokenProvider>,
        handler: impl MarketDataHandler,
        options: ClientOptions,
    ) -> Self {
        let metrics = Arc::new(AtomicMetrics::new());
        let dispatcher: Box<dyn InboundHandler> =
            Box::new(FrameDispatcher::new(handler, Arc::clone(&metrics)));
        let events = EventQueue::new(options.event_buffer);

        Self {
            provider,
            options,
            registry: Arc::new(SubscriptionRegistry::new()),
            link: Arc::new(tokio::sync::Mutex::new(None)),
            state: Arc::new(AtomicSupervisorState::new(SupervisorState::Idle)),
            metrics,
            events,
            shutdown: CancellationToken::new(),
            connect_id: uuid::Uuid::new_v4().to_string(),
            runtime: Mutex::new(Runtime {
                handler: Some(dispatcher),
                supervisor: None,
                dispatch: None,
            }),
        }
    }

    /// Start the supervisor and wait for the first connection attempt
    ///
    /// Returns true if the first attempt reached Connected. On false the
    /// supervisor keeps retrying in the background. Later calls do not start
    /// a second supervisor; they report the current connection status.
    pub async fn connect(&self) -> bool {
        if self.shutdown.is_cancelled() || self.state.get() == SupervisorState::Stopped {
            return false;
        }

        let first_outcome = {
            let mut runtime = self.runtime.lock();
            let Some(handler) = runtime.handler.take() else {
                return self.is_connected();
            };

            let (inbound_tx, inbound_rx) = mpsc::channel(self.options.inbound_buffer.max(1));
            let dispatch = match spawn_dispatch_thread(
                "kucoin-dispatch",
                inbound_rx,
                handler,
                Arc::clone(&self.metrics),
            ) {
                Ok(thread) => thread,
                Err(e) => {
                    error!("[KuCoin WS] Failed to spawn dispatch thread: {}", e);
                    self.events.emit(ClientEvent::Error(e.to_string()));
                    self.state.stop();
                    return false;
                }
            };

            let supervisor = ReconnectSupervisor {
                provider: Arc::clone(&self.provider),
                registry: Arc::clone(&self.registry),
                link: Arc::clone(&self.link),
                state: Arc::clone(&self.state),
                metrics: Arc::clone(&self.metrics),
                events: self.events.clone(),
                shutdown: self.shutdown.clone(),
                connect_id: self.connect_id.clone(),
                mode: self.options.mode,
                backoff: Arc::clone(&self.options.backoff),
                default_ping_interval: self.options.default_ping_interval,
                shutdown_timeout: self.options.shutdown_timeout,
                inbound: inbound_tx,
            };

            info!("[KuCoin WS] Starting ({:?} channel, connectId {})", self.options.mode, self.connect_id);
            self.state.set(SupervisorState::Connecting);

            let (tx, rx) = oneshot::channel();
            runtime.supervisor = Some(tokio::spawn(supervisor.run(tx)));
            runtime.dispatch = Some(dispatch);
            rx
        };

        first_outcome.await.unwrap_or(false)
    }

    /// Stop everything; idempotent and safe before `connect()`
    ///
    /// Each join is bounded by the shutdown timeout. Stopped is terminal:
    /// the client cannot be connected again.
    pub async fn disconnect(&self) {
        if self.shutdown.is_cancelled() && self.state.get() == SupervisorState::Stopped {
            return;
        }

        info!("[KuCoin WS] Disconnecting");
        self.shutdown.cancel();

        let (supervisor, dispatch) = {
            let mut runtime = self.runtime.lock();
            runtime.handler = None;
            (runtime.supervisor.take(), runtime.dispatch.take())
        };
        let timeout = self.options.shutdown_timeout;

        let active = match tokio::time::timeout(timeout, self.link.lock()).await {
            Ok(mut link) => link.take(),
            Err(_) => {
                warn!("[KuCoin WS] Session link busy, relying on cancellation");
                None
            }
        };
        if let Some(session) = active {
            session.close().await;
        }

        match supervisor {
            Some(handle) => {
                let abort = handle.abort_handle();
                if tokio::time::timeout(timeout, handle).await.is_err() {
                    warn!("[KuCoin WS] Supervisor did not stop within {:?}, aborting", timeout);
                    abort.abort();
                }
            }
            None => {
                self.events.emit(ClientEvent::Stopped);
            }
        }

        if let Some(dispatch) = dispatch {
            if !dispatch.join(timeout).await {
                warn!("[KuCoin WS] Dispatch thread still draining after {:?}, detaching", timeout);
            }
        }

        self.state.stop();
        info!("[KuCoin WS] Disconnected");
    }

    /// Register `topic` and send a subscribe frame if connected
    pub async fn subscribe(&self, topic: &str, private: bool, want_ack: bool) -> SubscribeOutcome {
        let subscription = Subscription::new(topic, private, want_ack);
        let link = self.link.lock().await;

        if !self.registry.add(subscription.clone()) {
            debug!("[KuCoin WS] Already subscribed to {}", topic);
            return SubscribeOutcome::AlreadySubscribed;
        }

        match send_on(&link, |id| subscription.subscribe_message(id)).await {
            Some(id) => {
                info!("[KuCoin WS] Subscribed to {} (id {})", topic, id);
                SubscribeOutcome::Sent(id)
            }
            None => {
                debug!("[KuCoin WS] Queued subscription to {}", topic);
                SubscribeOutcome::Queued
            }
        }
    }

    /// Register or replace `topic` and always send a subscribe frame if connected
    pub async fn force_subscribe(&self, topic: &str, private: bool, want_ack: bool) -> SubscribeOutcome {
        let subscription = Subscription::new(topic, private, want_ack);
        let link = self.link.lock().await;
        self.registry.upsert(subscription.clone());

        match send_on(&link, |id| subscription.subscribe_message(id)).await {
            Some(id) => SubscribeOutcome::Sent(id),
            None => SubscribeOutcome::Queued,
        }
    }

    /// Resend the subscribe frame of an already registered topic
    ///
    /// Returns `None` if the topic is not registered.
    pub async fn resubscribe(&self, topic: &str) -> Option<SubscribeOutcome> {
        let link = self.link.lock().await;
        let subscription = self.registry.get(topic)?;

        Some(match send_on(&link, |id| subscription.subscribe_message(id)).await {
            Some(id) => SubscribeOutcome::Sent(id),
            None => SubscribeOutcome::Queued,
        })
    }

    /// Remove `topic` and send an unsubscribe frame if connected
    pub async fn unsubscribe(&self, topic: &str, private: bool, want_ack: bool) -> UnsubscribeOutcome {
        let link = self.link.lock().await;

        if self.registry.remove(topic).is_none() {
            debug!("[KuCoin WS] Not subscribed to {}", topic);
            return UnsubscribeOutcome::NotFound;
        }

        let request = Subscription::new(topic, private, want_ack);
        match send_on(&link, |id| request.unsubscribe_message(id)).await {
            Some(id) => {
                info!("[KuCoin WS] Unsubscribed from {} (id {})", topic, id);
                UnsubscribeOutcome::Sent(id)
            }
            None => UnsubscribeOutcome::Removed,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.state.get() == SupervisorState::Connected
    }

    /// Registered subscriptions, ordered by topic
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.registry.snapshot()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.snapshot()
    }

    /// Stable identifier sent as `connectId` on every session
    pub fn connect_id(&self) -> &str {
        &self.connect_id
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<ClientEvent> {
        self.events.receiver().try_recv().ok()
    }

    /// Receive an event, blocking the current thread up to `timeout`
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<ClientEvent> {
        self.events.receiver().recv_timeout(timeout).ok()
    }

    /// Clone of the event receiver, for consumers on other threads
    pub fn events(&self) -> Receiver<ClientEvent> {
        self.events.receiver().clone()
    }

    /// Poll until the client reaches `target` or `timeout` elapses
    pub async fn wait_for_state(&self, target: SupervisorState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.get() == target {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for KucoinStreamClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Send on the linked session if it is connected; None means "not sent"
async fn send_on(
    link: &Option<Arc<ConnectionSession>>,
    build: impl FnOnce(MessageId) -> WsMessage,
) -> Option<MessageId> {
    let session = link.as_ref().filter(|session| session.is_connected())?;
    let id = next_message_id();
    match session.send(build(id)).await {
        Ok(()) => Some(id),
        Err(e) => {
            warn!("[KuCoin WS] Send failed, will replay on reconnect: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DataMessage;
    use crate::token::{AuthError, SessionGrant};
    use async_trait::async_trait;

    struct NoTokens;

    #[async_trait]
    impl SessionTokenProvider for NoTokens {
        async fn acquire(&self, _mode: ChannelMode) -> Result<SessionGrant, AuthError> {
            Err(AuthError::MissingData)
        }
    }

    fn client() -> KucoinStreamClient {
        KucoinStreamClient::new(
            Arc::new(NoTokens),
            |_msg: DataMessage| -> feedsockets::Result<()> { Ok(()) },
            ClientOptions::default().with_backoff(FixedDelay::new(Duration::from_millis(20))),
        )
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_queued() {
        let client = client();

        assert_eq!(client.subscribe("a", false, true).await, SubscribeOutcome::Queued);
        assert_eq!(client.subscribe("a", false, true).await, SubscribeOutcome::AlreadySubscribed);
        assert_eq!(client.subscriptions().len(), 1);
        assert_eq!(client.state(), SupervisorState::Idle);
    }

    #[tokio::test]
    async fn test_unsubscribe_outcomes_while_disconnected() {
        let client = client();
        client.subscribe("a", false, true).await;

        assert_eq!(client.unsubscribe("b", false, true).await, UnsubscribeOutcome::NotFound);
        assert_eq!(client.unsubscribe("a", false, true).await, UnsubscribeOutcome::Removed);
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_requires_registration() {
        let client = client();
        assert_eq!(client.resubscribe("a").await, None);

        client.subscribe("a", false, true).await;
        assert_eq!(client.resubscribe("a").await, Some(SubscribeOutcome::Queued));
    }

    #[tokio::test]
    async fn test_force_subscribe_replaces_entry() {
        let client = client();
        client.subscribe("a", false, true).await;
        client.force_subscribe("a", true, false).await;

        let subs = client.subscriptions();
        assert_eq!(subs.len(), 1);
        assert!(subs[0].private);
        assert!(!subs[0].want_ack);
    }

    #[tokio::test]
    async fn test_failed_first_attempt_keeps_retrying() {
        let client = client();

        assert!(!client.connect().await);
        assert!(matches!(client.try_recv_event(), Some(ClientEvent::Error(_))));
        assert!(client
            .wait_for_state(SupervisorState::Reconnecting, Duration::from_secs(1))
            .await);

        client.disconnect().await;
        assert_eq!(client.state(), SupervisorState::Stopped);
        assert!(!client.connect().await);
    }

    #[tokio::test]
    async fn test_disconnect_before_connect() {
        let client = client();
        client.disconnect().await;
        client.disconnect().await;

        assert_eq!(client.state(), SupervisorState::Stopped);
        assert_eq!(client.try_recv_event(), Some(ClientEvent::Stopped));
        assert_eq!(client.try_recv_event(), None);
        assert!(!client.connect().await);
    }

    #[test]
    fn test_event_queue_evicts_oldest() {
        let queue = EventQueue::new(2);
        queue.emit(ClientEvent::Reconnecting(1));
        queue.emit(ClientEvent::Reconnecting(2));
        queue.emit(ClientEvent::Stopped);

        let pending: Vec<ClientEvent> = queue.receiver().try_iter().collect();
        assert_eq!(pending, vec![ClientEvent::Reconnecting(2), ClientEvent::Stopped]);
    }

    #[tokio::test]
    async fn test_undrained_events_stay_bounded_while_retrying() {
        let client = KucoinStreamClient::new(
            Arc::new(NoTokens),
            |_msg: DataMessage| -> feedsockets::Result<()> { Ok(()) },
            ClientOptions::default()
                .with_backoff(FixedDelay::new(Duration::from_millis(1)))
                .with_event_buffer(8),
        );

        assert!(!client.connect().await);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(client.metrics().reconnect_count > 8);

        client.disconnect().await;
        let events: Vec<ClientEvent> = std::iter::from_fn(|| client.try_recv_event()).collect();
        assert!(events.len() <= 8, "queue grew to {}", events.len());
        assert_eq!(events.last(), Some(&ClientEvent::Stopped));
    }

    #[test]
    fn test_outcome_message_ids() {
        assert_eq!(SubscribeOutcome::Sent(5).message_id(), Some(5));
        assert_eq!(SubscribeOutcome::Queued.message_id(), None);
        assert_eq!(UnsubscribeOutcome::Sent(6).message_id(), Some(6));
        assert_eq!(UnsubscribeOutcome::NotFound.message_id(), None);
    }
}
