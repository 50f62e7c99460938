//! Keepalive timer for an active session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  KeepAlive Task     │
//! │  (Tokio spawn)      │
//! │                     │
//! │  Every interval:    │
//! │  1. Wait for tick   │
//! │  2. Build payload   │
//! │  3. session.send() ─┼──> writer lock ──> WebSocket
//! └─────────────────────┘
//! ```
//!
//! The task is bound to one session: it exits when the session's token is
//! cancelled, so no timer outlives its socket. A failed send is evidence
//! that the session is dead. The task closes the session (which wakes the
//! owner's reconnect path) and exits without retrying.

use crate::core::session::ConnectionSession;
use crate::traits::WsMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Smallest interval accepted; `tokio::time::interval` rejects zero
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running keepalive task
pub struct KeepAlive {
    handle: JoinHandle<()>,
    interval: Duration,
}

impl KeepAlive {
    /// Start sending `payload()` every `interval` over `session`
    ///
    /// The first frame goes out one full interval after start. Missed ticks
    /// are skipped rather than sent in a burst.
    pub fn spawn<F>(session: Arc<ConnectionSession>, interval: Duration, payload: F) -> Self
    where
        F: Fn() -> WsMessage + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let handle = tokio::spawn(keepalive_task(session, interval, payload));
        Self { handle, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit after its session was closed
    ///
    /// Aborts the task if it has not finished within `timeout`.
    pub async fn stop(self, timeout: Duration) {
        let abort = self.handle.abort_handle();
        if tokio::time::timeout(timeout, self.handle).await.is_err() {
            warn!("Keepalive did not stop within {:?}, aborting", timeout);
            abort.abort();
        }
    }
}

async fn keepalive_task<F>(session: Arc<ConnectionSession>, interval: Duration, payload: F)
where
    F: Fn() -> WsMessage,
{
    let cancel = session.cancel_token();
    let mut ticker = tokio::time::interval(interval);
    // Skip the first immediate tick - wait for the first interval
    ticker.tick().await;
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("[session {}] Keepalive started with interval {:?}", session.id(), interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = session.send(payload()).await {
                    warn!("[session {}] Keepalive send failed: {}", session.id(), e);
                    session.close().await;
                    break;
                }
                trace!("[session {}] Keepalive sent", session.id());
            }
        }
    }

    debug!("[session {}] Keepalive stopped", session.id());
}
