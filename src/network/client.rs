//! Relay Client
//!
//! [`RelayStore`] implements [`ReplicatedStore`] over a WebSocket
//! connection to a [`RelayServer`]. Requests are queued to a writer task
//! and never wait for the relay; notifications are routed to their
//! subscriptions by a reader task.
//!
//! [`RelayServer`]: crate::network::server::RelayServer

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::core::clock::{Clock, Millis, SystemClock};
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::store::{
    DisconnectOp, Notification, PushKeys, ReplicatedStore, StoreError, SubscribeMode, Subscription,
};

type Routes = Arc<Mutex<BTreeMap<u64, mpsc::UnboundedSender<Notification>>>>;

/// Queued for the writer task.
enum Outgoing {
    Request(ClientMessage),
    Close,
}

/// A participant's connection to a relay.
pub struct RelayStore {
    out: mpsc::UnboundedSender<Outgoing>,
    routes: Routes,
    next_subscription: AtomicU64,
    keys: Mutex<PushKeys>,
    /// Relay time minus local time.
    offset: Arc<AtomicI64>,
    connection: u64,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl RelayStore {
    /// Connect to `url` (e.g. `ws://127.0.0.1:8080`) and wait for the
    /// relay's welcome.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();

        let (connection, server_time) = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text)? {
                    ServerMessage::Welcome { connection, server_time, version } => {
                        info!(%url, connection, %version, "Connected to relay");
                        break (connection, server_time);
                    }
                    other => debug!(?other, "Message before welcome"),
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(StoreError::Disconnected),
            }
        };

        let offset = Arc::new(AtomicI64::new(server_time as i64 - local_now() as i64));
        let routes: Routes = Arc::new(Mutex::new(BTreeMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (out, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();

        tokio::spawn(async move {
            while let Some(Outgoing::Request(msg)) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize request");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let routes = routes.clone();
            let offset = offset.clone();
            let closed = closed.clone();
            let out = out.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let msg = match frame {
                        Ok(Message::Text(text)) => ServerMessage::from_json(&text).ok(),
                        Ok(Message::Binary(data)) => ServerMessage::from_bytes(&data).ok(),
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => continue,
                    };
                    match msg {
                        Some(ServerMessage::Notify { subscription, notification }) => {
                            route(&routes, &out, subscription, notification);
                        }
                        Some(ServerMessage::Pong { timestamp, server_time }) => {
                            let now = local_now();
                            let half_rtt = now.saturating_sub(timestamp) / 2;
                            offset.store((server_time + half_rtt) as i64 - now as i64, Ordering::SeqCst);
                        }
                        Some(ServerMessage::Error { code, message }) => {
                            warn!(?code, %message, "Relay rejected request");
                        }
                        Some(ServerMessage::Welcome { .. }) => {}
                        None => debug!("Undecodable relay frame"),
                    }
                }
                closed.store(true, Ordering::SeqCst);
                // Ends every subscription
                routes.lock().clear();
                debug!(connection, "Relay connection closed");
            })
        };

        Ok(Self {
            out,
            routes,
            next_subscription: AtomicU64::new(1),
            keys: Mutex::new(PushKeys::random()),
            offset,
            connection,
            closed,
            reader,
        })
    }

    /// Relay-side connection id.
    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    /// The relay connection is gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Ask the relay for its time; the reply refines [`server_time`].
    ///
    /// [`server_time`]: ReplicatedStore::server_time
    pub fn sync_clock(&self) -> Result<(), StoreError> {
        self.send(ClientMessage::Ping { timestamp: local_now() })
    }

    fn send(&self, msg: ClientMessage) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Disconnected);
        }
        self.out
            .send(Outgoing::Request(msg))
            .map_err(|_| StoreError::Disconnected)
    }
}

impl Drop for RelayStore {
    fn drop(&mut self) {
        // Writer flushes what is queued, then closes the socket
        let _ = self.out.send(Outgoing::Close);
        self.reader.abort();
    }
}

impl ReplicatedStore for RelayStore {
    fn subscribe(&self, path: &str, mode: SubscribeMode) -> Result<Subscription, StoreError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().insert(id, tx);
        self.send(ClientMessage::Subscribe {
            id,
            path: path.to_string(),
            mode,
        })?;
        Ok(Subscription::new(path, mode, rx))
    }

    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.send(ClientMessage::Set {
            path: path.to_string(),
            value,
        })
    }

    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.send(ClientMessage::Update {
            path: path.to_string(),
            fields: Value::Object(fields),
        })
    }

    fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let key = self.keys.lock().next(self.server_time());
        self.send(ClientMessage::Push {
            path: path.to_string(),
            key: key.clone(),
            value,
        })?;
        Ok(key)
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.send(ClientMessage::Remove { path: path.to_string() })
    }

    fn on_disconnect(&self, path: &str, op: DisconnectOp) -> Result<(), StoreError> {
        self.send(ClientMessage::OnDisconnect {
            path: path.to_string(),
            op,
        })
    }

    fn cancel_on_disconnect(&self, path: &str) -> Result<(), StoreError> {
        self.send(ClientMessage::CancelOnDisconnect { path: path.to_string() })
    }

    fn server_time(&self) -> Millis {
        let offset = self.offset.load(Ordering::SeqCst);
        (local_now() as i64 + offset).max(0) as Millis
    }
}

/// Deliver a notification; unsubscribe at the relay once the local end
/// has been dropped.
fn route(routes: &Routes, out: &mpsc::UnboundedSender<Outgoing>, id: u64, notification: Notification) {
    let mut routes = routes.lock();
    let dropped = match routes.get(&id) {
        Some(tx) => tx.send(notification).is_err(),
        None => false,
    };
    if dropped {
        routes.remove(&id);
        let _ = out.send(Outgoing::Request(ClientMessage::Unsubscribe { id }));
    }
}

fn local_now() -> Millis {
    SystemClock.now_ms()
}
