//! In-Memory Store
//!
//! A complete [`ReplicatedStore`] held in one process: a JSON tree behind a
//! `parking_lot` mutex, shared by any number of [`MemoryConnection`]s.
//! Every write computes the before/after value of each affected
//! subscription and sends the difference.
//!
//! Delivery can be held back and released later in any order (including
//! duplicated), which is how tests exercise reordering.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::clock::{Clock, Millis, SystemClock};
use crate::network::paths::{is_within, segments};
use crate::network::store::{
    DisconnectOp, Notification, PushKeys, ReplicatedStore, StoreError, SubscribeMode, Subscription,
};

/// A notification waiting for release while delivery is held.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingDelivery {
    /// Subscriber it is addressed to.
    pub subscriber: u64,
    /// The notification.
    pub notification: Notification,
}

struct Subscriber {
    id: u64,
    conn: u64,
    path: String,
    mode: SubscribeMode,
    tx: mpsc::UnboundedSender<Notification>,
}

struct Hub {
    root: Value,
    subscribers: Vec<Subscriber>,
    hooks: BTreeMap<u64, Vec<(String, DisconnectOp)>>,
    next_id: u64,
    clock: Arc<dyn Clock>,
    holding: bool,
    pending: Vec<PendingDelivery>,
}

/// Shared in-process store.
#[derive(Clone)]
pub struct MemoryStore {
    hub: Arc<Mutex<Hub>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hub = self.hub.lock();
        f.debug_struct("MemoryStore")
            .field("subscribers", &hub.subscribers.len())
            .field("pending", &hub.pending.len())
            .finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    /// Empty store stamping time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                root: Value::Object(Map::new()),
                subscribers: Vec::new(),
                hooks: BTreeMap::new(),
                next_id: 1,
                clock,
                holding: false,
                pending: Vec::new(),
            })),
        }
    }

    /// Open a participant connection.
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut hub = self.hub.lock();
            let id = hub.next_id;
            hub.next_id += 1;
            id
        };
        MemoryConnection {
            hub: self.hub.clone(),
            id,
            keys: Mutex::new(PushKeys::new(format!("{id:04x}"))),
            closed: AtomicBool::new(false),
        }
    }

    /// Read the value at a path.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segs = segments(path)?;
        lookup(&self.hub.lock().root, &segs).cloned()
    }

    /// Store time.
    pub fn now(&self) -> Millis {
        self.hub.lock().clock.now_ms()
    }

    /// Hold notifications instead of delivering them. Turning holding off
    /// releases everything pending in order.
    pub fn hold_delivery(&self, hold: bool) {
        let mut hub = self.hub.lock();
        hub.holding = hold;
        if !hold {
            let pending = std::mem::take(&mut hub.pending);
            hub.deliver_all(pending);
        }
    }

    /// Number of held notifications.
    pub fn pending_len(&self) -> usize {
        self.hub.lock().pending.len()
    }

    /// Release held notifications after letting `arrange` reorder, drop or
    /// duplicate them. Delivery stays held for later writes.
    pub fn release_with(&self, arrange: impl FnOnce(&mut Vec<PendingDelivery>)) {
        let mut hub = self.hub.lock();
        let mut pending = std::mem::take(&mut hub.pending);
        arrange(&mut pending);
        hub.deliver_all(pending);
    }

    /// Live subscriptions across all connections.
    pub fn subscriber_count(&self) -> usize {
        let mut hub = self.hub.lock();
        hub.subscribers.retain(|s| !s.tx.is_closed());
        hub.subscribers.len()
    }
}

// =============================================================================
// TREE
// =============================================================================

fn lookup<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    segs.iter().try_fold(root, |node, seg| node.as_object()?.get(*seg))
}

/// Write `value` at `segs`, creating objects on the way. `None` deletes
/// and prunes parents left empty.
fn write_at(node: &mut Value, segs: &[&str], value: Option<Value>) {
    let Some((first, rest)) = segs.split_first() else {
        return;
    };
    if !node.is_object() {
        if value.is_none() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        match value {
            Some(v) => {
                map.insert((*first).to_string(), v);
            }
            None => {
                map.remove(*first);
            }
        }
        return;
    }

    match value {
        Some(v) => {
            let child = map.entry((*first).to_string()).or_insert(Value::Null);
            write_at(child, rest, Some(v));
        }
        None => {
            if let Some(child) = map.get_mut(*first) {
                write_at(child, rest, None);
                if child.as_object().is_some_and(Map::is_empty) {
                    map.remove(*first);
                }
            }
        }
    }
}

fn children(value: Option<&Value>) -> Map<String, Value> {
    value.and_then(Value::as_object).cloned().unwrap_or_default()
}

fn diff(sub: &Subscriber, before: Option<&Value>, after: Option<&Value>) -> Vec<Notification> {
    match sub.mode {
        SubscribeMode::Value => {
            if before == after {
                return Vec::new();
            }
            vec![Notification::Value {
                path: sub.path.clone(),
                value: after.cloned(),
            }]
        }
        SubscribeMode::Children => {
            let old = children(before);
            let new = children(after);
            let mut out = Vec::new();
            for (key, value) in &new {
                match old.get(key) {
                    None => out.push(Notification::ChildAdded {
                        path: sub.path.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    }),
                    Some(prev) if prev != value => out.push(Notification::ChildChanged {
                        path: sub.path.clone(),
                        key: key.clone(),
                        value: value.clone(),
                    }),
                    Some(_) => {}
                }
            }
            for key in old.keys().filter(|k| !new.contains_key(*k)) {
                out.push(Notification::ChildRemoved {
                    path: sub.path.clone(),
                    key: key.clone(),
                });
            }
            out
        }
    }
}

impl Hub {
    /// Apply several writes as one atomic change and notify.
    fn apply(&mut self, writes: Vec<(String, Option<Value>)>) -> Result<(), StoreError> {
        let mut parsed = Vec::with_capacity(writes.len());
        for (path, value) in &writes {
            let segs = segments(path).ok_or_else(|| StoreError::InvalidPath(path.clone()))?;
            let value = value.clone().filter(|v| !v.is_null());
            parsed.push((segs, value));
        }

        self.subscribers.retain(|s| !s.tx.is_closed());
        let affected: Vec<usize> = self
            .subscribers
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                writes
                    .iter()
                    .any(|(path, _)| is_within(&s.path, path) || is_within(path, &s.path))
            })
            .map(|(i, _)| i)
            .collect();

        let before: Vec<Option<Value>> = affected
            .iter()
            .map(|&i| {
                segments(&self.subscribers[i].path).and_then(|segs| lookup(&self.root, &segs).cloned())
            })
            .collect();

        for (segs, value) in parsed {
            write_at(&mut self.root, &segs, value);
        }

        let mut out = Vec::new();
        for (&i, before) in affected.iter().zip(&before) {
            let sub = &self.subscribers[i];
            let after = segments(&sub.path).and_then(|segs| lookup(&self.root, &segs));
            for notification in diff(sub, before.as_ref(), after) {
                out.push(PendingDelivery {
                    subscriber: sub.id,
                    notification,
                });
            }
        }
        self.dispatch(out);
        Ok(())
    }

    fn dispatch(&mut self, deliveries: Vec<PendingDelivery>) {
        if self.holding {
            self.pending.extend(deliveries);
        } else {
            self.deliver_all(deliveries);
        }
    }

    fn deliver_all(&mut self, deliveries: Vec<PendingDelivery>) {
        for delivery in deliveries {
            if let Some(sub) = self.subscribers.iter().find(|s| s.id == delivery.subscriber) {
                // Receiver dropped: pruned on the next write
                let _ = sub.tx.send(delivery.notification);
            }
        }
    }

    fn subscribe(&mut self, conn: u64, path: &str, mode: SubscribeMode) -> Result<Subscription, StoreError> {
        let segs = segments(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id;
        self.next_id += 1;
        let sub = Subscriber {
            id,
            conn,
            path: path.to_string(),
            mode,
            tx,
        };

        let current = lookup(&self.root, &segs);
        let initial: Vec<PendingDelivery> = match mode {
            SubscribeMode::Value => vec![Notification::Value {
                path: path.to_string(),
                value: current.cloned(),
            }],
            SubscribeMode::Children => diff(&sub, None, current),
        }
        .into_iter()
        .map(|notification| PendingDelivery { subscriber: id, notification })
        .collect();

        self.subscribers.push(sub);
        self.dispatch(initial);
        Ok(Subscription::new(path, mode, rx))
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

/// One participant's connection to a [`MemoryStore`]. Dropping it runs its
/// disconnect hooks.
pub struct MemoryConnection {
    hub: Arc<Mutex<Hub>>,
    id: u64,
    keys: Mutex<PushKeys>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MemoryConnection {
    /// Connection identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connection has been dropped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Simulate the connection dropping: close this connection's
    /// subscriptions and run its disconnect hooks. Idempotent.
    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut hub = self.hub.lock();
        hub.subscribers.retain(|s| s.conn != self.id);

        let hooks = hub.hooks.remove(&self.id).unwrap_or_default();
        debug!(conn = self.id, hooks = hooks.len(), "Connection dropped");
        for (path, op) in hooks {
            let value = match op {
                DisconnectOp::Remove => None,
                DisconnectOp::Set { value } => Some(value),
            };
            if let Err(e) = hub.apply(vec![(path, value)]) {
                debug!(error = %e, "Disconnect hook failed");
            }
        }
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Disconnected);
        }
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl ReplicatedStore for MemoryConnection {
    fn subscribe(&self, path: &str, mode: SubscribeMode) -> Result<Subscription, StoreError> {
        self.check_open()?;
        self.hub.lock().subscribe(self.id, path, mode)
    }

    fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.check_open()?;
        self.hub.lock().apply(vec![(path.to_string(), Some(value))])
    }

    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check_open()?;
        let writes = fields
            .into_iter()
            .map(|(key, value)| (format!("{path}/{key}"), Some(value)))
            .collect();
        self.hub.lock().apply(writes)
    }

    fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        self.check_open()?;
        let mut hub = self.hub.lock();
        let key = self.keys.lock().next(hub.clock.now_ms());
        hub.apply(vec![(format!("{path}/{key}"), Some(value))])?;
        Ok(key)
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.check_open()?;
        self.hub.lock().apply(vec![(path.to_string(), None)])
    }

    fn on_disconnect(&self, path: &str, op: DisconnectOp) -> Result<(), StoreError> {
        self.check_open()?;
        segments(path).ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;
        self.hub
            .lock()
            .hooks
            .entry(self.id)
            .or_default()
            .push((path.to_string(), op));
        Ok(())
    }

    fn cancel_on_disconnect(&self, path: &str) -> Result<(), StoreError> {
        self.check_open()?;
        if let Some(hooks) = self.hub.lock().hooks.get_mut(&self.id) {
            hooks.retain(|(hook, _)| !is_within(hook, path));
        }
        Ok(())
    }

    fn server_time(&self) -> Millis {
        self.hub.lock().clock.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(ManualClock::new(1_000)))
    }

    #[test]
    fn test_value_subscription() {
        let store = store();
        let conn = store.connect();
        let mut sub = conn.subscribe("rooms/r/round", SubscribeMode::Value).unwrap();
        assert_eq!(
            sub.drain(),
            vec![Notification::Value { path: "rooms/r/round".into(), value: None }]
        );

        conn.set("rooms/r/round", json!({"number": 1})).unwrap();
        // Writing the same value again is not a change
        conn.set("rooms/r/round", json!({"number": 1})).unwrap();
        // Writes below the path reach it too
        conn.set("rooms/r/round/number", json!(2)).unwrap();
        // Unrelated writes do not
        conn.set("rooms/r/bomb", json!({})).unwrap();

        let values: Vec<_> = sub
            .drain()
            .into_iter()
            .map(|n| match n {
                Notification::Value { value, .. } => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![Some(json!({"number": 1})), Some(json!({"number": 2}))]);
    }

    #[test]
    fn test_children_subscription() {
        let store = store();
        let conn = store.connect();
        conn.set("rooms/r/players/a", json!({"hp": 100})).unwrap();

        let mut sub = conn.subscribe("rooms/r/players", SubscribeMode::Children).unwrap();
        assert!(matches!(&sub.drain()[..], [Notification::ChildAdded { key, .. }] if key == "a"));

        conn.update("rooms/r/players/a", serde_json::from_value(json!({"hp": 80})).unwrap())
            .unwrap();
        conn.set("rooms/r/players/b", json!({"hp": 100})).unwrap();
        conn.remove("rooms/r/players/a").unwrap();

        let seen = sub.drain();
        assert!(matches!(&seen[0], Notification::ChildChanged { key, value, .. } if key == "a" && value["hp"] == 80));
        assert!(matches!(&seen[1], Notification::ChildAdded { key, .. } if key == "b"));
        assert!(matches!(&seen[2], Notification::ChildRemoved { key, .. } if key == "a"));
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_update_is_one_change() {
        let store = store();
        let conn = store.connect();
        let mut sub = conn.subscribe("rooms/r/players/a", SubscribeMode::Value).unwrap();
        sub.drain();

        let fields = serde_json::from_value(json!({"x": 1, "y": 2, "hp": 100})).unwrap();
        conn.update("rooms/r/players/a", fields).unwrap();
        assert_eq!(sub.drain().len(), 1);
        assert_eq!(store.get("rooms/r/players/a/y"), Some(json!(2)));
    }

    #[test]
    fn test_push_keys_order_and_remove_prunes() {
        let store = store();
        let conn = store.connect();
        let k1 = conn.push("rooms/r/damage", json!({"d": 1})).unwrap();
        let k2 = conn.push("rooms/r/damage", json!({"d": 2})).unwrap();
        assert!(k1 < k2);

        conn.remove(&format!("rooms/r/damage/{k1}")).unwrap();
        conn.remove(&format!("rooms/r/damage/{k2}")).unwrap();
        assert_eq!(store.get("rooms/r/damage"), None);
        assert_eq!(store.get("rooms"), None);
        assert!(matches!(conn.set("a//b", json!(1)), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_disconnect_runs_hooks() {
        let store = store();
        let host = store.connect();
        let guest = store.connect();

        guest.set("rooms/r/players/g", json!({"hp": 100})).unwrap();
        guest.on_disconnect("rooms/r/players/g", DisconnectOp::Remove).unwrap();
        guest
            .on_disconnect("rooms/r/meta/closed", DisconnectOp::Set { value: json!(true) })
            .unwrap();
        guest.cancel_on_disconnect("rooms/r/meta").unwrap();

        let mut watch = host.subscribe("rooms/r/players", SubscribeMode::Children).unwrap();
        let mut own = guest.subscribe("rooms/r/players", SubscribeMode::Children).unwrap();
        watch.drain();
        own.drain();

        drop(guest);
        assert!(matches!(&watch.drain()[..], [Notification::ChildRemoved { key, .. }] if key == "g"));
        assert_eq!(store.get("rooms/r/meta"), None);
        assert!(own.drain().is_empty());
    }

    #[test]
    fn test_held_delivery_released_reversed() {
        let store = store();
        let conn = store.connect();
        let mut sub = conn.subscribe("rooms/r/round", SubscribeMode::Value).unwrap();
        sub.drain();

        store.hold_delivery(true);
        conn.set("rooms/r/round", json!(1)).unwrap();
        conn.set("rooms/r/round", json!(2)).unwrap();
        assert!(sub.drain().is_empty());
        assert_eq!(store.pending_len(), 2);

        store.release_with(|pending| pending.reverse());
        let values: Vec<_> = sub
            .drain()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Value { value, .. } => value,
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![json!(2), json!(1)]);
    }
}
