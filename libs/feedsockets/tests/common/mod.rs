//! Common test utilities for feedsockets integration tests
//!
//! Provides an echo WebSocket server that can also drop every open
//! connection on demand, and a peer that accepts but never reads.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy)]
enum Control {
    DropConnections,
    Shutdown,
}

/// A simple echo WebSocket server for testing
pub struct MockWsServer {
    pub addr: SocketAddr,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Create and start a new echo server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(16);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_control = control.clone();
        let accept_connections = Arc::clone(&connections);
        tokio::spawn(async move {
            let mut shutdown_rx = accept_control.subscribe();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                accept_connections.fetch_add(1, Ordering::SeqCst);
                                let control_rx = accept_control.subscribe();
                                tokio::spawn(Self::handle_connection(stream, control_rx));
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
            connections,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        mut control_rx: broadcast::Receiver<Control>,
    ) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if msg.is_text() || msg.is_binary() {
                                // Echo the message back
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = control_rx.recv() => {
                    // Drop without a close frame, like a dead peer
                    break;
                }
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Total connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Abruptly drop every open connection
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::DropConnections);
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.control.send(Control::Shutdown);
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Completes the handshake, then never reads, so client writes back up
pub struct StalledWsServer {
    pub addr: SocketAddr,
    accept: tokio::task::JoinHandle<()>,
}

impl StalledWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    held.push(ws);
                }
            }
        });

        Self { addr, accept }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for StalledWsServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}
