//! WebSocket Store Relay
//!
//! Serves a [`MemoryStore`] to remote participants. Each WebSocket
//! connection gets its own [`MemoryConnection`], so disconnect hooks run
//! when the socket goes away, exactly as they do in-process.
//!
//! The relay knows nothing about the game. It forwards store requests and
//! notifications; every gameplay rule runs in the participants.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::network::memory::{MemoryConnection, MemoryStore};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::store::{ReplicatedStore, StoreError};

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The store relay.
pub struct RelayServer {
    config: RelayConfig,
    store: MemoryStore,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Relay over a fresh store.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_store(config, MemoryStore::default())
    }

    /// Relay over an existing store.
    pub fn with_store(config: RelayConfig, store: MemoryStore) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            store,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// The relayed store.
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Open WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        info!(addr = ?listener.local_addr().ok(), "Relay listening");
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.config.max_connections {
                                warn!(%addr, "Connection limit reached, rejecting");
                                continue;
                            }
                            info!(%addr, "New connection");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let conn = self.store.connect();
        let connections = self.connections.clone();
        let ping_every = self.config.ping_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!(%addr, error = %e, "WebSocket handshake failed");
                    connections.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };

            let (ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(256);
            let sender_task = tokio::spawn(write_frames(ws_sender, msg_rx, ping_every));

            let _ = msg_tx
                .send(ServerMessage::Welcome {
                    connection: conn.id(),
                    server_time: conn.server_time(),
                    version: crate::VERSION.to_string(),
                })
                .await;

            let mut link = Link::new(conn, msg_tx.clone());
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let request = match msg {
                            Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text).map_err(|e| e.to_string()),
                            Some(Ok(Message::Binary(data))) => ClientMessage::from_bytes(&data).map_err(|e| e.to_string()),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%addr, "Client disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(%addr, error = %e, "WebSocket error");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let reply = match request {
                            Ok(request) => link.handle(request),
                            Err(e) => {
                                debug!(%addr, error = %e, "Invalid message");
                                Some(error_reply(ErrorCode::InvalidMessage, "Invalid message format"))
                            }
                        };
                        if let Some(reply) = reply {
                            if msg_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(error_reply(ErrorCode::Shutdown, "Relay shutting down")).await;
                        break;
                    }
                }
            }

            link.close();
            drop(link);
            drop(msg_tx);
            // Let queued replies drain before the socket goes
            let _ = tokio::time::timeout(Duration::from_millis(250), sender_task).await;
            connections.fetch_sub(1, Ordering::SeqCst);
            info!(%addr, "Client cleaned up");
        });
    }
}

/// Outgoing half of a connection: replies, notifications and keepalives.
async fn write_frames<S>(mut ws_sender: S, mut msg_rx: mpsc::Receiver<ServerMessage>, ping_every: Duration)
where
    S: futures_util::Sink<Message> + Unpin,
{
    let mut keepalive = interval(ping_every);
    keepalive.tick().await;

    loop {
        tokio::select! {
            msg = msg_rx.recv() => {
                let Some(msg) = msg else { break };
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = keepalive.tick() => {
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_sender.close().await;
}

fn error_reply(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
    ServerMessage::Error {
        code,
        message: message.into(),
    }
}

fn store_error_reply(e: &StoreError) -> ServerMessage {
    let code = match e {
        StoreError::InvalidPath(_) => ErrorCode::InvalidPath,
        StoreError::Disconnected => ErrorCode::Shutdown,
        _ => ErrorCode::InvalidMessage,
    };
    error_reply(code, e.to_string())
}

// =============================================================================
// CONNECTION LINK
// =============================================================================

/// A relayed client's store connection and its forwarded subscriptions.
struct Link {
    conn: MemoryConnection,
    tx: mpsc::Sender<ServerMessage>,
    forwards: BTreeMap<u64, JoinHandle<()>>,
}

impl Link {
    fn new(conn: MemoryConnection, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            conn,
            tx,
            forwards: BTreeMap::new(),
        }
    }

    /// Execute one request. Returns the reply, if the request has one.
    fn handle(&mut self, request: ClientMessage) -> Option<ServerMessage> {
        let result = match request {
            ClientMessage::Subscribe { id, path, mode } => {
                if self.forwards.contains_key(&id) {
                    return Some(error_reply(
                        ErrorCode::DuplicateSubscription,
                        format!("Subscription {id} already in use"),
                    ));
                }
                self.conn.subscribe(&path, mode).map(|mut sub| {
                    let tx = self.tx.clone();
                    let task = tokio::spawn(async move {
                        while let Some(notification) = sub.recv().await {
                            let msg = ServerMessage::Notify {
                                subscription: id,
                                notification,
                            };
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                    });
                    self.forwards.insert(id, task);
                })
            }
            ClientMessage::Unsubscribe { id } => {
                if let Some(task) = self.forwards.remove(&id) {
                    task.abort();
                }
                Ok(())
            }
            ClientMessage::Set { path, value } => self.conn.set(&path, value),
            ClientMessage::Update { path, fields } => match fields {
                serde_json::Value::Object(fields) => self.conn.update(&path, fields),
                _ => return Some(error_reply(ErrorCode::InvalidFields, "Update fields must be an object")),
            },
            ClientMessage::Push { path, key, value } => {
                if key.is_empty() || key.contains('/') {
                    Err(StoreError::InvalidPath(format!("{path}/{key}")))
                } else {
                    self.conn.set(&format!("{path}/{key}"), value)
                }
            }
            ClientMessage::Remove { path } => self.conn.remove(&path),
            ClientMessage::OnDisconnect { path, op } => self.conn.on_disconnect(&path, op),
            ClientMessage::CancelOnDisconnect { path } => self.conn.cancel_on_disconnect(&path),
            ClientMessage::Ping { timestamp } => {
                return Some(ServerMessage::Pong {
                    timestamp,
                    server_time: self.conn.server_time(),
                });
            }
        };

        match result {
            Ok(()) => None,
            Err(e) => {
                debug!(conn = self.conn.id(), error = %e, "Request rejected");
                Some(store_error_reply(&e))
            }
        }
    }

    /// Stop forwarding and run the connection's disconnect hooks.
    fn close(&mut self) {
        for (_, task) in std::mem::take(&mut self.forwards) {
            task.abort();
        }
        self.conn.disconnect();
    }
}
