//! Room Session
//!
//! One participant's view of a room. A session owns the participant's
//! [`RoomState`], a connection to the replicated store and the room's
//! subscriptions, and glues them together once per frame:
//!
//! ```text
//! store notifications ──► reconcile ──► RoomState ◄── intents
//!                                          │
//!                                      game::tick
//!                                          │
//!                      store writes ◄── outbound
//! ```
//!
//! Every participant runs the same code. The creator of a room is its
//! host and additionally drives the round clock and the bomb timer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::core::clock::Millis;
use crate::core::hash::StateHash;
use crate::game::authority::Authority;
use crate::game::combat::ShotTrail;
use crate::game::error::ActionError;
use crate::game::events::GameEvent;
use crate::game::input::{InputFrame, Intent};
use crate::game::map::MapView;
use crate::game::phase;
use crate::game::scheduler::TimerKind;
use crate::game::state::{Outbound, PlayerId, PlayerSnapshot, PlayerState, RoomState, Team};
use crate::game::tick;
use crate::network::paths::RoomPaths;
use crate::network::reconcile::{self, Channel};
use crate::network::store::{
    decode, encode, DisconnectOp, Notification, ReplicatedStore, StoreError, SubscribeMode, Subscription,
};

/// Room meta record, written once by the creator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomMeta {
    /// Host participant.
    pub host: PlayerId,
    /// Store time of creation.
    pub created_at: Millis,
    /// Set by the host's disconnect hook.
    #[serde(default)]
    pub closed: bool,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Store rejected a request or went away.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Room id is not a single path segment.
    #[error("Invalid room id: {0:?}")]
    InvalidRoomId(String),

    /// Nothing is stored under the room id.
    #[error("Room {0} not found")]
    RoomNotFound(String),

    /// Another room already uses the id.
    #[error("Room {0} already exists")]
    RoomExists(String),

    /// Host left the room.
    #[error("Room {0} is closed")]
    RoomClosed(String),

    /// Gameplay action rejected.
    #[error(transparent)]
    Action(#[from] ActionError),
}

/// The room's subscriptions, one per replicated path.
struct Feeds {
    meta: Subscription,
    players: Subscription,
    round: Subscription,
    bomb: Subscription,
    damage: Subscription,
    shots: Subscription,
}

impl Feeds {
    fn open<S: ReplicatedStore>(store: &S, paths: &RoomPaths, meta: Subscription) -> Result<Self, StoreError> {
        Ok(Self {
            meta,
            players: store.subscribe(&paths.players(), SubscribeMode::Children)?,
            round: store.subscribe(&paths.round(), SubscribeMode::Value)?,
            bomb: store.subscribe(&paths.bomb(), SubscribeMode::Value)?,
            damage: store.subscribe(&paths.damage(), SubscribeMode::Children)?,
            shots: store.subscribe(&paths.shots(), SubscribeMode::Children)?,
        })
    }
}

/// A participant's live connection to one room.
pub struct RoomSession<S: ReplicatedStore> {
    store: S,
    map: Arc<dyn MapView>,
    paths: RoomPaths,
    state: RoomState,
    feeds: Feeds,
    intents: Vec<Intent>,
    last_frame: InputFrame,
    trails: BTreeMap<String, ShotTrail>,
    event_tx: broadcast::Sender<GameEvent>,
}

impl<S: ReplicatedStore> RoomSession<S> {
    /// Create a room and become its host.
    pub async fn create(
        store: S,
        map: Arc<dyn MapView>,
        room_id: &str,
        local_id: PlayerId,
        name: &str,
        config: GameConfig,
    ) -> Result<Self, SessionError> {
        let paths = room_paths(room_id)?;
        let mut meta_feed = store.subscribe(&paths.meta(), SubscribeMode::Value)?;
        if first_value(&mut meta_feed).await?.is_some() {
            return Err(SessionError::RoomExists(room_id.to_string()));
        }

        let meta = RoomMeta {
            host: local_id,
            created_at: store.server_time(),
            closed: false,
        };
        store.set(&paths.meta(), encode(&meta)?)?;
        store.on_disconnect(&paths.closed_flag(), DisconnectOp::Set { value: Value::Bool(true) })?;

        let local = PlayerState::new(local_id, name, Team::A, &config);
        let state = RoomState::new(room_id, local, Authority::creator(local_id), config);

        info!(room = %room_id, host = %local_id.short(), "Room created");
        Self::open(store, map, paths, state, meta_feed)
    }

    /// Join an existing room on the smaller team.
    pub async fn join(
        store: S,
        map: Arc<dyn MapView>,
        room_id: &str,
        local_id: PlayerId,
        name: &str,
        config: GameConfig,
    ) -> Result<Self, SessionError> {
        let paths = room_paths(room_id)?;
        let mut meta_feed = store.subscribe(&paths.meta(), SubscribeMode::Value)?;
        let meta: RoomMeta = match first_value(&mut meta_feed).await? {
            Some(value) => decode(&value)?,
            None => return Err(SessionError::RoomNotFound(room_id.to_string())),
        };
        if meta.closed {
            return Err(SessionError::RoomClosed(room_id.to_string()));
        }

        let mut roster = store.subscribe(&paths.players(), SubscribeMode::Value)?;
        let teams: Vec<Team> = match first_value(&mut roster).await? {
            Some(Value::Object(records)) => records
                .values()
                .filter_map(|record| decode::<PlayerSnapshot>(record).ok())
                .filter(|p| p.id != local_id)
                .map(|p| p.team)
                .collect(),
            _ => Vec::new(),
        };
        drop(roster);
        let team = Team::balance(&teams);

        let local = PlayerState::new(local_id, name, team, &config);
        let state = RoomState::new(room_id, local, Authority::new(local_id, meta.host), config);

        info!(room = %room_id, player = %local_id.short(), ?team, "Joined room");
        Self::open(store, map, paths, state, meta_feed)
    }

    /// Place the local player, publish it, register its disconnect hook
    /// and subscribe to the room.
    fn open(
        store: S,
        map: Arc<dyn MapView>,
        paths: RoomPaths,
        mut state: RoomState,
        meta_feed: Subscription,
    ) -> Result<Self, SessionError> {
        let local_id = state.local_id();
        let team = state.require_local()?.team;
        let spawn = map.spawn_point(team, &mut state.rng);
        if let Some(local) = state.local_mut() {
            local.position = spawn;
        }
        store.on_disconnect(&paths.player(local_id), DisconnectOp::Remove)?;

        let feeds = Feeds::open(&store, &paths, meta_feed)?;
        let (event_tx, _) = broadcast::channel(256);
        let mut session = Self {
            store,
            map,
            paths,
            state,
            feeds,
            intents: Vec::new(),
            last_frame: InputFrame::new(),
            trails: BTreeMap::new(),
            event_tx,
        };

        let now = session.store.server_time();
        session.state.mark_local_dirty();
        session.state.flush_local(now);
        session.publish(now);
        Ok(session)
    }

    // =========================================================================
    // FRAME LOOP
    // =========================================================================

    /// Queue an intent for the next tick.
    pub fn submit(&mut self, intent: Intent) {
        self.intents.push(intent);
    }

    /// Queue the intents implied by a new input frame.
    pub fn submit_frame(&mut self, frame: InputFrame) {
        self.intents.extend(frame.intents_since(&self.last_frame));
        self.last_frame = frame;
    }

    /// Run one frame: apply notifications, advance the game, write the
    /// resulting deltas. Returns the events produced.
    pub fn tick(&mut self) -> Vec<GameEvent> {
        let now = self.store.server_time();
        self.drain_feeds(now);

        let events = if self.state.closed {
            self.intents.clear();
            self.state.take_events()
        } else {
            let intents = std::mem::take(&mut self.intents);
            let result = tick::tick(&mut self.state, self.map.as_ref(), now, &intents);
            self.write_all(now, result.outbound);
            result.events
        };

        for event in &events {
            // No receivers is fine
            let _ = self.event_tx.send(event.clone());
        }
        events
    }

    /// Begin round 1 (host only).
    pub fn start_match(&mut self) -> Result<(), SessionError> {
        if self.state.closed {
            return Err(SessionError::RoomClosed(self.state.room_id.clone()));
        }
        let now = self.store.server_time();
        phase::start_match(&mut self.state, self.map.as_ref(), now)?;
        self.publish(now);
        Ok(())
    }

    /// Leave the room. The host's departure deletes the room; anyone
    /// else removes only their own record.
    pub fn leave(self) -> Result<(), SessionError> {
        self.store.cancel_on_disconnect(self.paths.root())?;
        if self.state.authority.is_host() {
            self.store.remove(self.paths.root())?;
        } else {
            self.store.remove(&self.paths.player(self.state.local_id()))?;
        }
        info!(room = %self.state.room_id, player = %self.state.local_id().short(), "Left room");
        Ok(())
    }

    fn drain_feeds(&mut self, now: Millis) {
        let channels = [
            (Channel::Meta, &mut self.feeds.meta),
            (Channel::Players, &mut self.feeds.players),
            (Channel::Round, &mut self.feeds.round),
            (Channel::Bomb, &mut self.feeds.bomb),
            (Channel::Damage, &mut self.feeds.damage),
        ];
        for (channel, feed) in channels {
            for notification in feed.drain() {
                reconcile::apply(&mut self.state, self.map.as_ref(), now, channel, notification);
            }
        }

        for notification in self.feeds.shots.drain() {
            match notification {
                Notification::ChildAdded { key, value, .. } | Notification::ChildChanged { key, value, .. } => {
                    match decode::<ShotTrail>(&value) {
                        Ok(trail) => {
                            self.trails.insert(key, trail);
                        }
                        Err(e) => debug!(%key, error = %e, "Undecodable shot trail"),
                    }
                }
                Notification::ChildRemoved { key, .. } => {
                    self.trails.remove(&key);
                }
                Notification::Value { .. } => {}
            }
        }
    }

    /// Write whatever the state has queued outside a tick.
    fn publish(&mut self, now: Millis) {
        let outbound = self.state.take_outbound();
        self.write_all(now, outbound);
    }

    fn write_all(&mut self, now: Millis, outbound: Vec<Outbound>) {
        for delta in outbound {
            if let Err(e) = self.write(now, delta) {
                warn!(room = %self.state.room_id, error = %e, "Store write failed");
            }
        }
    }

    fn write(&mut self, now: Millis, delta: Outbound) -> Result<(), StoreError> {
        match delta {
            Outbound::Player(snapshot) => {
                let path = self.paths.player(snapshot.id);
                match encode(&snapshot)? {
                    Value::Object(fields) => self.store.update(&path, fields),
                    other => self.store.set(&path, other),
                }
            }
            Outbound::Round(round) => self.store.set(&self.paths.round(), encode(&round)?),
            Outbound::Bomb(bomb) => self.store.set(&self.paths.bomb(), encode(&bomb)?),
            Outbound::Damage(event) => {
                let key = self.store.push(&self.paths.damage(), encode(&event)?)?;
                debug!(%key, target = %event.target.short(), damage = event.damage, "Damage sent");
                Ok(())
            }
            Outbound::AckDamage(key) => self.store.remove(&self.paths.damage_event(&key)),
            Outbound::Shot(trail) => {
                let key = self.store.push(&self.paths.shots(), encode(&trail)?)?;
                let expires = now + self.state.config.sync.shot_ttl_ms;
                self.state.scheduler.arm(expires, TimerKind::ShotExpire { key });
                Ok(())
            }
            Outbound::ExpireShot(key) => self.store.remove(&self.paths.shot(&key)),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Room identifier.
    pub fn room_id(&self) -> &str {
        &self.state.room_id
    }

    /// Local participant.
    pub fn local_id(&self) -> PlayerId {
        self.state.local_id()
    }

    /// This participant hosts the room.
    pub fn is_host(&self) -> bool {
        self.state.authority.is_host()
    }

    /// Host left; the session is inert.
    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    /// Current room state.
    pub fn state(&self) -> &RoomState {
        &self.state
    }

    /// Mutable room state for tools and tests. Changes bypass intent
    /// validation; call [`RoomState::mark_local_dirty`] to publish them.
    pub fn state_mut(&mut self) -> &mut RoomState {
        &mut self.state
    }

    /// Remote shot trails currently published, by store key.
    pub fn shot_trails(&self) -> &BTreeMap<String, ShotTrail> {
        &self.trails
    }

    /// Fingerprint of the replicated state.
    pub fn fingerprint(&self) -> StateHash {
        self.state.compute_hash()
    }

    /// Store connection.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Subscribe to the events produced by [`tick`](Self::tick).
    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.event_tx.subscribe()
    }
}

fn room_paths(room_id: &str) -> Result<RoomPaths, SessionError> {
    if room_id.is_empty() || room_id.contains('/') {
        return Err(SessionError::InvalidRoomId(room_id.to_string()));
    }
    Ok(RoomPaths::new(room_id))
}

/// Initial value of a fresh `Value` subscription.
async fn first_value(feed: &mut Subscription) -> Result<Option<Value>, StoreError> {
    match feed.recv().await {
        Some(Notification::Value { value, .. }) => Ok(value),
        Some(_) => Ok(None),
        None => Err(StoreError::Disconnected),
    }
}

// =============================================================================
// TESTS
// =============================================================================
