//! Common test utilities for kucoin integration tests
//!
//! Provides a WebSocket server that speaks enough of KuCoin's protocol for
//! the client (welcome, pong, ack), records every frame it receives per
//! connection, and can kick clients or push data frames on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use kucoin::{AuthError, ChannelMode, InstanceServer, SessionGrant, SessionTokenProvider};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
enum Control {
    Kick,
    Push(String),
    Shutdown,
}

/// Frames received on each accepted connection, in accept order
type FrameLog = Arc<Mutex<Vec<Vec<Value>>>>;

pub struct MockKucoinServer {
    pub addr: SocketAddr,
    control: broadcast::Sender<Control>,
    frames: FrameLog,
    connections: Arc<AtomicUsize>,
}

impl MockKucoinServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);
        let frames: FrameLog = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_control = control.clone();
        let accept_frames = Arc::clone(&frames);
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            let mut shutdown_rx = accept_control.subscribe();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let index = {
                                    let mut log = accept_frames.lock();
                                    log.push(Vec::new());
                                    log.len() - 1
                                };
                                accept_connections.fetch_add(1, Ordering::SeqCst);
                                let control_rx = accept_control.subscribe();
                                tokio::spawn(Self::handle_connection(
                                    stream,
                                    index,
                                    Arc::clone(&accept_frames),
                                    control_rx,
                                ));
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    ctrl = shutdown_rx.recv() => {
                        if matches!(ctrl, Ok(Control::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            addr,
            control,
            frames,
            connections,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        index: usize,
        frames: FrameLog,
        mut control_rx: broadcast::Receiver<Control>,
    ) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        let welcome = json!({ "id": format!("conn-{}", index), "type": "welcome" });
        if write.send(Message::Text(welcome.to_string())).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    let text = match msg {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    };
                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    frames.lock()[index].push(frame.clone());

                    let id = frame["id"].to_string().trim_matches('"').to_string();
                    let reply = match frame["type"].as_str() {
                        Some("ping") => Some(json!({ "id": id, "type": "pong" })),
                        Some("subscribe") | Some("unsubscribe") if frame["response"] == true => {
                            Some(json!({ "id": id, "type": "ack" }))
                        }
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        if write.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
                ctrl = control_rx.recv() => {
                    match ctrl {
                        Ok(Control::Push(text)) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        // Drop without a close frame, like a dead peer
                        Ok(Control::Kick) | Ok(Control::Shutdown) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Abruptly drop every open connection
    pub fn kick(&self) {
        let _ = self.control.send(Control::Kick);
    }

    /// Send a raw text frame to every open connection
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.control.send(Control::Push(text.into()));
    }

    /// Frames received on connection `index`
    pub fn frames(&self, index: usize) -> Vec<Value> {
        self.frames.lock().get(index).cloned().unwrap_or_default()
    }

    /// Frames of the given `type` received on connection `index`
    pub fn frames_of_type(&self, index: usize, kind: &str) -> Vec<Value> {
        self.frames(index)
            .into_iter()
            .filter(|f| f["type"] == kind)
            .collect()
    }

    /// Subscribed topics on connection `index`, in arrival order
    pub fn subscribed_topics(&self, index: usize) -> Vec<String> {
        self.frames_of_type(index, "subscribe")
            .iter()
            .filter_map(|f| f["topic"].as_str().map(str::to_string))
            .collect()
    }

    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }
}

impl Drop for MockKucoinServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Token provider pointing at a mock server, failing the first `failures` calls
pub struct ScriptedTokenProvider {
    endpoint: String,
    ping_interval_ms: Option<u64>,
    failures: AtomicUsize,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTokenProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ping_interval_ms: Some(60_000),
            failures: AtomicUsize::new(0),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_ping_interval_ms(mut self, ms: u64) -> Self {
        self.ping_interval_ms = Some(ms);
        self
    }

    pub fn failing_first(self, failures: usize) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl SessionTokenProvider for ScriptedTokenProvider {
    async fn acquire(&self, _mode: ChannelMode) -> Result<SessionGrant, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AuthError::ApiError("scripted failure".to_string()));
        }

        Ok(SessionGrant {
            token: "test-token".to_string(),
            instance_servers: vec![InstanceServer {
                endpoint: self.endpoint.clone(),
                ping_interval: self.ping_interval_ms,
                ping_timeout: Some(10_000),
                protocol: Some("websocket".to_string()),
                encrypt: false,
            }],
        })
    }
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
