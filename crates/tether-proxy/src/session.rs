//! Per-player session state, the roster, and the close/rebind plumbing.
//!
//! A session spans both halves. Shared fields follow a single-writer rule
//! (position, inventory, and bed state belong to the server half; identity
//! is immutable after login); lifecycle transitions go through the
//! coordinator so close and rebind are serialized and idempotent.

use std::sync::{
    Arc,
    atomic::{AtomicI32, AtomicI64, AtomicU8, AtomicU64, Ordering},
};
use std::time::Instant;

use bytes::Bytes;
use papaya::HashMap;
use parking_lot::Mutex;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde_json::{Value, json};
use tether_protocol::{
    BlockPos, Clientbound, PacketBuf, ProtocolError, ProtocolVersion, Revision, Serverbound,
    SlotData,
};
use uuid::Uuid;

use crate::{auth::ProfileProperty, connection::Outgoing};

/// Connection phase of one half-pair. Stored as one value for the whole
/// session: the halves never disagree once login completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Handshake = 0,
    Status = 1,
    Login = 2,
    Play = 3,
    Closed = 4,
}

impl SessionState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Handshake,
            1 => Self::Status,
            2 => Self::Login,
            3 => Self::Play,
            _ => Self::Closed,
        }
    }
}

pub struct Session {
    /// Stream id, unique per accepted connection; used in logs and as the
    /// roster key.
    pub id: u64,
    pub version: ProtocolVersion,
    pub revision: Revision,
    pub username: String,
    /// Identity the external client was authenticated as.
    pub uuid: Uuid,
    /// Identity the offline-mode backend derives for the same player.
    pub offline_uuid: Uuid,
    /// Profile properties from the session service; replayed into
    /// player-list rewrites.
    pub properties: Vec<ProfileProperty>,
    /// Compression threshold negotiated with the external client.
    pub compression_threshold: i32,

    state: AtomicU8,
    server_eid: AtomicI32,
    gamemode: AtomicU8,
    dimension: AtomicI32,
    position: Mutex<(f64, f64, f64)>,
    bed_position: Mutex<Option<BlockPos>>,
    riding: Mutex<Option<i32>>,
    inventory: Mutex<FxHashMap<i16, SlotData>>,
    last_server_keep_alive: Mutex<Instant>,

    client: Outgoing,
    server: Mutex<Option<Outgoing>>,
    /// Bumped on every [`Self::attach_server`]; a stale server half
    /// compares its own generation before touching the session so a
    /// rebind's predecessor cannot tear down its successor.
    server_generation: AtomicU64,
}

impl Session {
    #[must_use]
    pub fn new(
        id: u64,
        version: ProtocolVersion,
        username: String,
        uuid: Uuid,
        offline_uuid: Uuid,
        properties: Vec<ProfileProperty>,
        compression_threshold: i32,
        client: Outgoing,
    ) -> Self {
        Self {
            id,
            version,
            revision: Revision::select(version),
            username,
            uuid,
            offline_uuid,
            properties,
            compression_threshold,
            state: AtomicU8::new(SessionState::Login as u8),
            server_eid: AtomicI32::new(-1),
            gamemode: AtomicU8::new(0),
            dimension: AtomicI32::new(0),
            position: Mutex::new((0.0, 0.0, 0.0)),
            bed_position: Mutex::new(None),
            riding: Mutex::new(None),
            inventory: Mutex::new(FxHashMap::default()),
            last_server_keep_alive: Mutex::new(Instant::now()),
            client,
            server: Mutex::new(None),
            server_generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Transitions to Closed. Returns the state it left behind, `None` if
    /// the session was already closed, which makes teardown idempotent.
    pub fn mark_closed(&self) -> Option<SessionState> {
        let prior = self.state.swap(SessionState::Closed as u8, Ordering::AcqRel);
        let prior = SessionState::from_raw(prior);
        (prior != SessionState::Closed).then_some(prior)
    }

    #[must_use]
    pub fn server_eid(&self) -> i32 {
        self.server_eid.load(Ordering::Acquire)
    }

    pub fn set_server_eid(&self, eid: i32) {
        self.server_eid.store(eid, Ordering::Release);
    }

    #[must_use]
    pub fn gamemode(&self) -> u8 {
        self.gamemode.load(Ordering::Acquire)
    }

    pub fn set_gamemode(&self, gamemode: u8) {
        self.gamemode.store(gamemode, Ordering::Release);
    }

    #[must_use]
    pub fn dimension(&self) -> i32 {
        self.dimension.load(Ordering::Acquire)
    }

    pub fn set_dimension(&self, dimension: i32) {
        self.dimension.store(dimension, Ordering::Release);
    }

    #[must_use]
    pub fn position(&self) -> (f64, f64, f64) {
        *self.position.lock()
    }

    pub fn set_position(&self, x: f64, y: f64, z: f64) {
        *self.position.lock() = (x, y, z);
    }

    #[must_use]
    pub fn bed_position(&self) -> Option<BlockPos> {
        *self.bed_position.lock()
    }

    pub fn set_bed_position(&self, location: BlockPos) {
        *self.bed_position.lock() = Some(location);
    }

    #[must_use]
    pub fn riding(&self) -> Option<i32> {
        *self.riding.lock()
    }

    pub fn set_riding(&self, vehicle: Option<i32>) {
        *self.riding.lock() = vehicle;
    }

    pub fn set_inventory_slot(&self, slot: i16, data: SlotData) {
        self.inventory.lock().insert(slot, data);
    }

    #[must_use]
    pub fn inventory_slot(&self, slot: i16) -> Option<SlotData> {
        self.inventory.lock().get(&slot).cloned()
    }

    pub fn clear_inventory(&self) {
        self.inventory.lock().clear();
    }

    pub fn touch_server_keep_alive(&self) {
        *self.last_server_keep_alive.lock() = Instant::now();
    }

    #[must_use]
    pub fn server_keep_alive_age(&self) -> std::time::Duration {
        self.last_server_keep_alive.lock().elapsed()
    }

    /// Builds one `{id, body}` payload for a named client-bound play
    /// packet in this session's revision.
    pub fn encode_clientbound(
        &self,
        name: Clientbound,
        write: impl FnOnce(&mut PacketBuf) -> Result<(), ProtocolError>,
    ) -> anyhow::Result<Bytes> {
        let id = self.revision.require_clientbound(name)?;
        let mut buf = PacketBuf::new(id, self.version);
        write(&mut buf)?;
        Ok(buf.finish())
    }

    /// Builds one `{id, body}` payload for a named server-bound play
    /// packet in this session's revision.
    pub fn encode_serverbound(
        &self,
        name: Serverbound,
        write: impl FnOnce(&mut PacketBuf) -> Result<(), ProtocolError>,
    ) -> anyhow::Result<Bytes> {
        let id = self.revision.require_serverbound(name)?;
        let mut buf = PacketBuf::new(id, self.version);
        write(&mut buf)?;
        Ok(buf.finish())
    }

    /// Payload fragment identifying this player in bus events.
    #[must_use]
    pub fn player_ref(&self) -> Value {
        json!({
            "username": self.username,
            "uuid": self.uuid,
        })
    }

    /// Queues a `{id, body}` payload toward the external client.
    pub async fn send_client(&self, payload: Bytes) -> anyhow::Result<()> {
        self.client.send(payload).await
    }

    /// Queues a `{id, body}` payload toward the backend, silently dropping
    /// it while no server half is attached (mid-rebind).
    pub async fn send_server(&self, payload: Bytes) -> anyhow::Result<()> {
        let outgoing = self.server.lock().clone();
        match outgoing {
            Some(outgoing) => outgoing.send(payload).await,
            None => Ok(()),
        }
    }

    /// Relays a mid-play compression switch to the server half's writer;
    /// the queue hand-off orders it against frames already queued.
    pub async fn set_server_compression(&self, threshold: i32) -> anyhow::Result<()> {
        let outgoing = self.server.lock().clone();
        match outgoing {
            Some(outgoing) => outgoing.set_compression(threshold).await,
            None => Ok(()),
        }
    }

    /// Installs a server half and returns its generation token.
    pub fn attach_server(&self, outgoing: Outgoing) -> u64 {
        *self.server.lock() = Some(outgoing);
        self.server_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[must_use]
    pub fn server_generation(&self) -> u64 {
        self.server_generation.load(Ordering::Acquire)
    }

    /// Detaches and closes the server-half queue; the client half stays
    /// open. Used by rebind and teardown.
    pub fn detach_server(&self) {
        if let Some(outgoing) = self.server.lock().take() {
            outgoing.close();
        }
    }

    /// Drains and closes the client queue so notices queued before the
    /// close still reach the player.
    pub async fn shutdown_client(&self) {
        self.client.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("uuid", &self.uuid)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Roster of live sessions, keyed by stream id with read-through lookups
/// for the three identities a packet can name a player by.
#[derive(Default)]
pub struct Roster {
    by_id: HashMap<u64, Arc<Session>, FxBuildHasher>,
    /// World time scraped from TIME_UPDATE; shared by every session since
    /// one backend serves them all.
    time_of_day: AtomicI64,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.by_id.pin().insert(session.id, session);
    }

    pub fn remove(&self, id: u64) {
        self.by_id.pin().remove(&id);
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.by_id.pin().get(&id).cloned()
    }

    #[must_use]
    pub fn lookup_by_uuid(&self, uuid: Uuid) -> Option<Arc<Session>> {
        self.by_id
            .pin()
            .values()
            .find(|session| session.uuid == uuid)
            .cloned()
    }

    #[must_use]
    pub fn lookup_by_offline_uuid(&self, uuid: Uuid) -> Option<Arc<Session>> {
        self.by_id
            .pin()
            .values()
            .find(|session| session.offline_uuid == uuid)
            .cloned()
    }

    #[must_use]
    pub fn lookup_by_server_eid(&self, eid: i32) -> Option<Arc<Session>> {
        self.by_id
            .pin()
            .values()
            .find(|session| session.server_eid() == eid)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.pin().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.pin().is_empty()
    }

    #[must_use]
    pub fn time_of_day(&self) -> i64 {
        self.time_of_day.load(Ordering::Relaxed)
    }

    pub fn set_time_of_day(&self, time: i64) {
        self.time_of_day.store(time, Ordering::Relaxed);
    }
}
