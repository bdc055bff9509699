//! WebSocket Stream Server
//!
//! Accepts display clients over WebSocket. A client connecting to
//! `ws://host:port/kiosk` is registered with page name `kiosk` (`/` maps to
//! [`DEFAULT_PAGE`]), immediately receives the current status and then one
//! text frame per dispatch.
//!
//! Clients never need to send anything. Pings are answered; a close frame,
//! read error or failed write ends the connection and unregisters it.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::conductor::StatusCell;
use crate::config::ServerConfig;
use crate::messages::PushRenderer;
use crate::registry::ClientRegistry;

/// Page name for a client connecting to `/`
pub const DEFAULT_PAGE: &str = "index";

/// Map a request path to a page name
#[must_use]
pub fn page_name_from_path(path: &str) -> String {
    let page = path.trim_matches('/');
    if page.is_empty() {
        DEFAULT_PAGE.to_string()
    } else {
        page.to_string()
    }
}

/// WebSocket server feeding the client registry
pub struct StreamServer {
    addr: SocketAddr,
    registry: ClientRegistry,
    status: StatusCell,
    renderer: Arc<dyn PushRenderer>,
    max_clients: usize,
    client_buffer: usize,
    shutdown: watch::Receiver<bool>,
}

impl StreamServer {
    /// Create a server using the `[server]` config section
    pub fn new(
        config: &ServerConfig,
        registry: ClientRegistry,
        status: StatusCell,
        renderer: Arc<dyn PushRenderer>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            addr: config.listen_addr,
            registry,
            status,
            renderer,
            max_clients: config.max_clients,
            client_buffer: config.client_buffer.max(1),
            shutdown,
        }
    }

    /// Bind the listen address, returning the actual local address
    ///
    /// Useful with port 0 to get an OS-assigned port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_clients = self.max_clients, "Stream server bound");
        Ok((listener, local_addr))
    }

    /// Bind and serve until shutdown
    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept loop on a pre-bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_clients));
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "TCP accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        tracing::warn!(peer = %peer, max = self.max_clients, "Client limit reached, rejecting");
                        drop(stream);
                        continue;
                    };

                    let connection = ClientConnection {
                        registry: self.registry.clone(),
                        status: self.status.clone(),
                        renderer: Arc::clone(&self.renderer),
                        client_buffer: self.client_buffer,
                        shutdown: self.shutdown.clone(),
                    };
                    tokio::spawn(async move {
                        let _permit = permit;
                        connection.handle(stream, peer).await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Stream server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Everything one connection task needs
struct ClientConnection {
    registry: ClientRegistry,
    status: StatusCell,
    renderer: Arc<dyn PushRenderer>,
    client_buffer: usize,
    shutdown: watch::Receiver<bool>,
}

impl ClientConnection {
    async fn handle(mut self, stream: TcpStream, peer: SocketAddr) {
        let mut path = String::new();
        let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, capture_path).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "WebSocket handshake failed");
                return;
            }
        };
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel(self.client_buffer);
        let id = self.registry.register(tx, page_name_from_path(&path));

        let status = &self.status;
        self.registry
            .greet(&id, self.renderer.as_ref(), || status.get());

        loop {
            tokio::select! {
                push = rx.recv() => {
                    let Some(push) = push else { break };
                    let text = match push.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(client_id = %id, error = %e, "Failed to encode push");
                            continue;
                        }
                    };
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        tracing::debug!(client_id = %id, error = %e, "Write failed, dropping client");
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Ping(data))) => {
                            if ws_tx.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::debug!(client_id = %id, "Client closed");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(client_id = %id, error = %e, "Read error, dropping client");
                            break;
                        }
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        self.registry.unregister(&id);
    }
}
