//! Dedicated dispatch thread
//!
//! Consumer code runs on its own OS thread, fed by the bounded inbound
//! channel. The thread outlives individual sessions: it exits once every
//! sender (the owner's and each session reader's) has been dropped.

use crate::core::connection_state::AtomicMetrics;
use crate::traits::{InboundHandler, WsMessage};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Handle to a running dispatch thread
pub struct DispatchThread {
    handle: JoinHandle<()>,
}

impl DispatchThread {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Join with a bounded wait
    ///
    /// Returns false if the thread is still running after `timeout`; it is
    /// then left detached.
    pub async fn join(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.handle.join().is_ok()
    }
}

/// Spawn the dispatch thread
///
/// Handler errors and panics are logged and counted; the next message is
/// processed regardless.
pub fn spawn_dispatch_thread<H>(
    name: &str,
    mut inbound: mpsc::Receiver<WsMessage>,
    mut handler: H,
    metrics: Arc<AtomicMetrics>,
) -> std::io::Result<DispatchThread>
where
    H: InboundHandler,
{
    let thread_name = name.to_string();
    let handle = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            debug!("[{}] Dispatch thread started", thread_name);

            while let Some(message) = inbound.blocking_recv() {
                match catch_unwind(AssertUnwindSafe(|| handler.on_message(message))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        metrics.increment_handler_failures();
                        error!("[{}] Handler error: {}", thread_name, e);
                    }
                    Err(panic) => {
                        metrics.increment_handler_failures();
                        error!("[{}] Handler panicked: {}", thread_name, panic_message(&*panic));
                    }
                }
            }

            debug!("[{}] Inbound channel closed, dispatch thread exiting", thread_name);
        })?;

    Ok(DispatchThread { handle })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
