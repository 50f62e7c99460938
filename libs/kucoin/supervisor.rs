//! Reconnect supervisor
//!
//! # State machine
//!
//! ```text
//!            connect()
//!   Idle ──────────────> Connecting ──── token + open + replay ───> Connected
//!                           ^   │                                      │
//!                           │   │ failure                  socket lost │
//!                 backoff   │   v                                      │
//!                 elapsed   Reconnecting <─────────────────────────────┘
//!
//!   any ── disconnect() / backoff exhausted ──> Stopped (terminal)
//! ```
//!
//! The supervisor runs as a single task and owns at most one session at a
//! time: a session is fully torn down (unlinked, closed, keepalive stopped)
//! before the next token is requested.

use crate::client::{ClientEvent, EventQueue};
use crate::protocol::ping_message;
use crate::registry::SubscriptionRegistry;
use crate::token::{AuthError, ChannelMode, SessionTokenProvider};
use feedsockets::{AtomicMetrics, BackoffStrategy, ConnectionSession, FeedError, KeepAlive, WsMessage};
use reqwest::Url;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Slot holding the active session
///
/// Caller mutations and subscription replay both run under this lock, so a
/// subscribe racing a reconnect is sent exactly once.
pub(crate) type SessionLink = tokio::sync::Mutex<Option<Arc<ConnectionSession>>>;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Token acquisition failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] FeedError),
}

/// Lifecycle of the client as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SupervisorState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Stopped = 4,
}

impl SupervisorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SupervisorState::Idle,
            1 => SupervisorState::Connecting,
            2 => SupervisorState::Connected,
            3 => SupervisorState::Reconnecting,
            _ => SupervisorState::Stopped,
        }
    }
}

#[derive(Debug)]
pub struct AtomicSupervisorState(AtomicU8);

impl AtomicSupervisorState {
    pub fn new(state: SupervisorState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn get(&self) -> SupervisorState {
        SupervisorState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the state unless it is already Stopped
    #[inline]
    pub fn set(&self, state: SupervisorState) {
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            (current != SupervisorState::Stopped as u8).then_some(state as u8)
        });
    }

    /// Enter the terminal state
    #[inline]
    pub fn stop(&self) {
        self.0.store(SupervisorState::Stopped as u8, Ordering::Release);
    }
}

/// Everything one supervisor task needs
pub(crate) struct ReconnectSupervisor {
    pub provider: Arc<dyn SessionTokenProvider>,
    pub registry: Arc<SubscriptionRegistry>,
    pub link: Arc<SessionLink>,
    pub state: Arc<AtomicSupervisorState>,
    pub metrics: Arc<AtomicMetrics>,
    pub events: EventQueue,
    pub shutdown: CancellationToken,
    pub connect_id: String,
    pub mode: ChannelMode,
    pub backoff: Arc<dyn BackoffStrategy>,
    pub default_ping_interval: Duration,
    pub shutdown_timeout: Duration,
    pub inbound: mpsc::Sender<WsMessage>,
}

impl ReconnectSupervisor {
    /// Main loop; `first_outcome` receives whether the first attempt connected
    pub(crate) async fn run(self, first_outcome: oneshot::Sender<bool>) {
        let mut first_outcome = Some(first_outcome);
        let mut attempt: usize = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.state.set(SupervisorState::Connecting);

            let established = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok((session, keepalive)) => {
                    self.events.emit(ClientEvent::Connected { attempt: attempt + 1 });
                    if let Some(tx) = first_outcome.take() {
                        let _ = tx.send(true);
                    }
                    attempt = 0;

                    // Resolves on peer close, read/write failure, keepalive
                    // failure or shutdown (the session token is a child)
                    session.closed().await;

                    self.teardown(&session, keepalive).await;
                    self.events.emit(ClientEvent::Disconnected);

                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!("[KuCoin WS] Connection lost");
                }
                Err(e) => {
                    error!("[KuCoin WS] Connection attempt failed: {}", e);
                    self.events.emit(ClientEvent::Error(e.to_string()));
                    if let Some(tx) = first_outcome.take() {
                        let _ = tx.send(false);
                    }
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            let Some(delay) = self.backoff.next_delay(attempt) else {
                warn!("[KuCoin WS] Reconnection strategy exhausted, stopping");
                break;
            };

            self.state.set(SupervisorState::Reconnecting);
            attempt += 1;
            self.metrics.increment_reconnects();
            self.events.emit(ClientEvent::Reconnecting(attempt));
            info!("[KuCoin WS] Reconnecting in {:?} (attempt {})", delay, attempt);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.stop();
        self.events.emit(ClientEvent::Stopped);
        info!("[KuCoin WS] Supervisor stopped");
    }

    /// One connection attempt: token, socket, keepalive, replay
    async fn establish(&self) -> Result<(Arc<ConnectionSession>, KeepAlive), SupervisorError> {
        let grant = self.provider.acquire(self.mode).await?;
        let server = grant.primary_server()?;
        let url = socket_url(&server.endpoint, &grant.token, &self.connect_id)?;
        let ping_interval = server.ping_interval_or(self.default_ping_interval);

        let session = ConnectionSession::open(
            url.as_str(),
            self.inbound.clone(),
            Arc::clone(&self.metrics),
            &self.shutdown,
        )
        .await?;
        let keepalive = KeepAlive::spawn(Arc::clone(&session), ping_interval, ping_message);

        let mut link = self.link.lock().await;
        let replayed = match self.registry.replay_all(&session).await {
            Ok(count) => count,
            Err(e) => {
                drop(link);
                warn!("[KuCoin WS] Subscription replay failed: {}", e);
                session.close().await;
                keepalive.stop(self.shutdown_timeout).await;
                return Err(e.into());
            }
        };

        *link = Some(Arc::clone(&session));
        self.state.set(SupervisorState::Connected);
        drop(link);

        info!(
            "[KuCoin WS] Connected to {} (ping every {:?}, {} subscription(s) replayed)",
            session.endpoint(),
            keepalive.interval(),
            replayed
        );
        Ok((session, keepalive))
    }

    /// Unlink, close and stop the keepalive of a finished session
    async fn teardown(&self, session: &Arc<ConnectionSession>, keepalive: KeepAlive) {
        {
            let mut link = self.link.lock().await;
            if link.as_ref().is_some_and(|active| Arc::ptr_eq(active, session)) {
                *link = None;
            }
        }
        session.close().await;
        keepalive.stop(self.shutdown_timeout).await;
        debug!("[KuCoin WS] Session {} torn down", session.id());
    }
}

/// `{endpoint}?token=..&connectId=..`
pub(crate) fn socket_url(endpoint: &str, token: &str, connect_id: &str) -> Result<Url, AuthError> {
    let mut url = Url::parse(endpoint).map_err(|e| AuthError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("connectId", connect_id);
    Ok(url)
}
