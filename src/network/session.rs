//! Room Session Management
//!
//! Manages the lifecycle of rooms from creation to destruction.
//! Couples each room's game state with the channels of its connected
//! players, and keeps the room registry plus a per-connection membership
//! index for disconnect handling.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::core::rng::DeterministicRng;
use crate::game::deck::Card;
use crate::game::state::{
    BelowMinimumPolicy, ConnectionId, Departure, GameError, GameSession, MatchConfig, RoomId,
};
use crate::network::protocol::{CardView, PlayerView, RoomStateUpdate, ServerMessage};

/// Default delay before a revealed pair is resolved.
pub const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(crate::REVEAL_DELAY_MS);

/// Configuration for rooms.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rules applied to new rooms.
    pub match_config: MatchConfig,
    /// How long a revealed pair stays face up before resolution.
    pub reveal_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            match_config: MatchConfig::default(),
            reveal_delay: DEFAULT_REVEAL_DELAY,
        }
    }
}

impl SessionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let rules = defaults.match_config;

        Self {
            match_config: MatchConfig {
                min_players: env_var("MIN_PLAYERS").unwrap_or(rules.min_players),
                max_players: env_var("MAX_PLAYERS").unwrap_or(rules.max_players),
                card_count: env_var("CARD_COUNT").unwrap_or(rules.card_count),
                below_minimum: env_var::<PolicyName>("BELOW_MIN_POLICY")
                    .map(|p| p.0)
                    .unwrap_or(rules.below_minimum),
            },
            reveal_delay: env_var("REVEAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reveal_delay),
        }
    }
}

/// Read and parse an environment variable, warning on unparseable values.
pub(crate) fn env_var<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}, using default", key, raw);
            None
        }
    }
}

struct PolicyName(BelowMinimumPolicy);

impl FromStr for PolicyName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pause" => Ok(Self(BelowMinimumPolicy::Pause)),
            "continue" => Ok(Self(BelowMinimumPolicy::Continue)),
            _ => Err(()),
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Room id already taken.
    #[error("Room already exists")]
    RoomExists,

    /// No room with that id.
    #[error("Room not found")]
    RoomNotFound,

    /// Room roster is full.
    #[error("Room is full")]
    RoomFull,

    /// Connection is not seated in the room.
    #[error("Not in room")]
    NotInRoom,

    /// Room was destroyed while the request waited on it.
    #[error("Room closed")]
    Closed,

    /// Engine refused the change.
    #[error(transparent)]
    Game(GameError),
}

impl From<GameError> for RegistryError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::RoomFull => RegistryError::RoomFull,
            other => RegistryError::Game(other),
        }
    }
}

// =============================================================================
// ROOM SESSION
// =============================================================================

/// A room: game state plus the outbound channels of its players.
pub struct RoomSession {
    game: GameSession,
    senders: BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    closed: bool,
}

impl RoomSession {
    /// Wrap a game session.
    pub fn new(game: GameSession) -> Self {
        Self {
            game,
            senders: BTreeMap::new(),
            closed: false,
        }
    }

    /// Game state.
    pub fn game(&self) -> &GameSession {
        &self.game
    }

    /// Mutable game state.
    pub fn game_mut(&mut self) -> &mut GameSession {
        &mut self.game
    }

    /// Seat a connection. Returns `Ok(false)` if it was already seated.
    pub fn add_member(
        &mut self,
        connection_id: ConnectionId,
        username: &str,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<bool, RegistryError> {
        let joined = self.game.join(connection_id, username)?;
        self.senders.insert(connection_id, sender);
        Ok(joined)
    }

    /// Unseat a connection; an emptied room closes itself.
    pub fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<Departure> {
        self.senders.remove(connection_id);
        let departure = self.game.remove_player(connection_id)?;
        if departure.room_empty {
            self.close();
        }
        Some(departure)
    }

    /// Mark the room destroyed and void pending resolutions.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.game.invalidate_pending();
        }
    }

    /// Whether the room has been destroyed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the connection is seated here.
    pub fn is_member(&self, connection_id: &ConnectionId) -> bool {
        self.game.player(connection_id).is_some()
    }

    /// Usernames in join order.
    pub fn usernames(&self) -> Vec<String> {
        self.game.players().iter().map(|p| p.username.clone()).collect()
    }

    /// Public room state. Only face-up cards carry symbols.
    pub fn state_update(&self) -> RoomStateUpdate {
        let game = &self.game;
        let visible = |ids: &mut dyn Iterator<Item = u32>| -> Vec<CardView> {
            ids.filter_map(|id| game.visible_card(id)).map(card_view).collect()
        };

        RoomStateUpdate {
            room_id: game.id().to_string(),
            state: game.phase(),
            players: game
                .players()
                .iter()
                .map(|p| PlayerView { username: p.username.clone(), score: p.score })
                .collect(),
            current_turn: (!game.turn_order().is_empty()).then(|| game.current_turn_index()),
            current_player: game.current_player().map(|p| p.username.clone()),
            revealed: visible(&mut game.revealed().iter().copied()),
            matched: visible(&mut game.matched().iter().copied()),
            deck_len: game.deck().len(),
            winners: game.winners().to_vec(),
        }
    }

    /// Broadcast a message to every seated connection.
    ///
    /// Never waits on a member's queue: the room lock is held here.
    pub async fn broadcast(&self, message: ServerMessage) {
        for (connection_id, sender) in &self.senders {
            deliver(connection_id, sender, message.clone());
        }
    }

    /// Broadcast the current room state.
    pub async fn broadcast_state(&self) {
        self.broadcast(ServerMessage::State(self.state_update())).await;
    }
}

/// Queue a message without waiting. A full queue drops the message.
pub fn deliver(connection_id: &ConnectionId, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) -> bool {
    match sender.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Outbound queue full for {}, dropping message", connection_id.short());
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Outbound queue closed for {}", connection_id.short());
            false
        }
    }
}

/// Client view of a face-up card.
pub fn card_view(card: Card) -> CardView {
    CardView {
        id: card.id,
        symbol: card.symbol.glyph().to_string(),
    }
}

/// Shared handle to a room.
pub type SharedRoom = Arc<RwLock<RoomSession>>;

/// Result of seating a connection.
pub struct Seat {
    /// The room.
    pub room: SharedRoom,
    /// The room was created by this request.
    pub created: bool,
    /// The connection was not already seated.
    pub joined: bool,
}

/// Result of removing a connection from a room.
pub struct Leave {
    /// Room id.
    pub room_id: RoomId,
    /// The room (closed if it emptied).
    pub room: SharedRoom,
    /// What the engine reported.
    pub departure: Departure,
}

// =============================================================================
// ROOM REGISTRY
// =============================================================================

/// Maps room ids to rooms.
///
/// Lock order: the map lock is never held while waiting on a room lock.
/// Destroying a room takes the map lock while holding that room's lock,
/// so a closed room is gone from the map before anyone else can lock it.
pub struct RoomRegistry {
    /// Active rooms.
    rooms: RwLock<BTreeMap<RoomId, SharedRoom>>,
    /// Rooms each connection is seated in.
    memberships: RwLock<BTreeMap<ConnectionId, BTreeSet<RoomId>>>,
    /// Defaults for new rooms.
    config: SessionConfig,
}

impl RoomRegistry {
    /// Create new registry.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
            memberships: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// Room defaults.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn new_room(&self, room_id: &str, card_count: Option<usize>) -> SharedRoom {
        let match_config = MatchConfig {
            card_count: card_count.unwrap_or(self.config.match_config.card_count),
            ..self.config.match_config.clone()
        };
        let entropy = uuid::Uuid::new_v4();
        let rng = DeterministicRng::for_room(room_id, entropy.as_bytes());
        Arc::new(RwLock::new(RoomSession::new(GameSession::new(room_id, match_config, rng))))
    }

    /// Create a room. Fails if the id is taken.
    pub async fn create(&self, room_id: &str, card_count: Option<usize>) -> Result<SharedRoom, RegistryError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(room_id) {
            return Err(RegistryError::RoomExists);
        }
        let room = self.new_room(room_id, card_count);
        rooms.insert(room_id.to_string(), room.clone());
        info!("Room {} created", room_id);
        Ok(room)
    }

    /// Get a room, creating it if absent. The flag is true when created.
    pub async fn create_or_get(&self, room_id: &str, card_count: Option<usize>) -> (SharedRoom, bool) {
        if let Some(room) = self.get(room_id).await {
            return (room, false);
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return (room.clone(), false);
        }
        let room = self.new_room(room_id, card_count);
        rooms.insert(room_id.to_string(), room.clone());
        info!("Room {} created", room_id);
        (room, true)
    }

    /// Get a room by id.
    pub async fn get(&self, room_id: &str) -> Option<SharedRoom> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).cloned()
    }

    /// Create a room and seat its first player.
    pub async fn create_room(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        username: &str,
        card_count: Option<usize>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Seat, RegistryError> {
        loop {
            let room = self.create(room_id, card_count).await?;
            match self.seat(&room, connection_id, username, sender.clone()).await {
                Ok(joined) => return Ok(Seat { room, created: true, joined }),
                Err(RegistryError::Closed) => continue,
                Err(e) => {
                    self.discard_if_empty(room_id, &room).await;
                    return Err(e);
                }
            }
        }
    }

    /// Seat a player in an existing room, or create it when allowed.
    pub async fn join_room(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        username: &str,
        create_if_missing: bool,
        card_count: Option<usize>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<Seat, RegistryError> {
        loop {
            let (room, created) = if create_if_missing {
                self.create_or_get(room_id, card_count).await
            } else {
                (self.get(room_id).await.ok_or(RegistryError::RoomNotFound)?, false)
            };
            match self.seat(&room, connection_id, username, sender.clone()).await {
                Ok(joined) => return Ok(Seat { room, created, joined }),
                Err(RegistryError::Closed) => {}
                Err(e) => {
                    if created {
                        self.discard_if_empty(room_id, &room).await;
                    }
                    return Err(e);
                }
            }
            // Raced with destruction; the room is already out of the map.
            debug!("Room {} closed while joining, retrying", room_id);
        }
    }

    /// Seat a connection. Fails with `Closed` if the room was destroyed first.
    async fn seat(
        &self,
        room: &SharedRoom,
        connection_id: ConnectionId,
        username: &str,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<bool, RegistryError> {
        let (room_id, joined) = {
            let mut session = room.write().await;
            if session.is_closed() {
                return Err(RegistryError::Closed);
            }
            let joined = session.add_member(connection_id, username, sender)?;
            if joined {
                info!(
                    "{} ({}) joined room {}",
                    username,
                    connection_id.short(),
                    session.game().id()
                );
            }
            (session.game().id().to_string(), joined)
        };

        let mut memberships = self.memberships.write().await;
        memberships.entry(connection_id).or_default().insert(room_id);
        Ok(joined)
    }

    /// Remove a connection from one room, destroying the room if it empties.
    pub async fn leave(&self, room_id: &str, connection_id: &ConnectionId) -> Result<Leave, RegistryError> {
        let room = self.get(room_id).await.ok_or(RegistryError::RoomNotFound)?;
        let departure = self.unseat(room_id, &room, connection_id).await?;

        let mut memberships = self.memberships.write().await;
        if let Some(rooms) = memberships.get_mut(connection_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                memberships.remove(connection_id);
            }
        }

        Ok(Leave { room_id: room_id.to_string(), room, departure })
    }

    /// Remove a connection from every room it is seated in.
    pub async fn disconnect(&self, connection_id: &ConnectionId) -> Vec<Leave> {
        let room_ids = {
            let mut memberships = self.memberships.write().await;
            memberships.remove(connection_id).unwrap_or_default()
        };

        let mut leaves = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            let Some(room) = self.get(&room_id).await else {
                continue;
            };
            if let Ok(departure) = self.unseat(&room_id, &room, connection_id).await {
                leaves.push(Leave { room_id, room, departure });
            }
        }
        leaves
    }

    async fn unseat(
        &self,
        room_id: &str,
        room: &SharedRoom,
        connection_id: &ConnectionId,
    ) -> Result<Departure, RegistryError> {
        let mut session = room.write().await;
        let departure = session.remove_member(connection_id).ok_or(RegistryError::NotInRoom)?;
        debug!(
            "{} ({}) left room {}",
            departure.player.username,
            connection_id.short(),
            room_id
        );

        if departure.room_empty {
            self.remove(room_id, room).await;
        }
        Ok(departure)
    }

    async fn discard_if_empty(&self, room_id: &str, room: &SharedRoom) {
        let mut session = room.write().await;
        if session.game().players().is_empty() {
            session.close();
            self.remove(room_id, room).await;
        }
    }

    /// Drop a room from the map if it is still the registered instance.
    pub async fn remove(&self, room_id: &str, room: &SharedRoom) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, room)) {
            rooms.remove(room_id);
            info!("Room {} destroyed", room_id);
        }
    }

    /// Whether `room` is the instance registered under `room_id`.
    pub async fn is_current(&self, room_id: &str, room: &SharedRoom) -> bool {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, room))
    }

    /// Get active room count.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Rooms a connection is seated in.
    pub async fn rooms_of(&self, connection_id: &ConnectionId) -> BTreeSet<RoomId> {
        let memberships = self.memberships.read().await;
        memberships.get(connection_id).cloned().unwrap_or_default()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::SessionPhase;

    fn conn(n: u8) -> ConnectionId {
        ConnectionId::new([n; 16])
    }

    fn channel() -> (mpsc::Sender<ServerMessage>, mpsc::Receiver<ServerMessage>) {
        mpsc::channel(16)
    }

    #[tokio::test]
    async fn test_create_room() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        let seat = registry.create_room("lobby", conn(1), "ann", None, tx).await.unwrap();
        assert!(seat.created);
        assert!(seat.joined);
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(seat.room.read().await.usernames(), vec!["ann"]);
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        registry.create_room("lobby", conn(1), "ann", None, tx.clone()).await.unwrap();
        let result = registry.create_room("lobby", conn(2), "bob", None, tx).await;
        assert!(matches!(result, Err(RegistryError::RoomExists)));
    }

    #[tokio::test]
    async fn test_join_missing_room() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        let result = registry.join_room("nowhere", conn(1), "ann", false, None, tx).await;
        assert!(matches!(result, Err(RegistryError::RoomNotFound)));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_creates_when_allowed() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        let seat = registry.join_room("lobby", conn(1), "ann", true, Some(8), tx.clone()).await.unwrap();
        assert!(seat.created);
        assert_eq!(seat.room.read().await.game().deck().len(), 8);

        let seat = registry.join_room("lobby", conn(2), "bob", true, None, tx).await.unwrap();
        assert!(!seat.created);
        assert!(seat.joined);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_twice_is_idempotent() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        registry.create_room("lobby", conn(1), "ann", None, tx.clone()).await.unwrap();
        let seat = registry.join_room("lobby", conn(1), "ann", false, None, tx).await.unwrap();
        assert!(!seat.joined);
        assert_eq!(seat.room.read().await.game().players().len(), 1);
    }

    #[tokio::test]
    async fn test_full_room() {
        let config = SessionConfig {
            match_config: MatchConfig { max_players: 1, ..MatchConfig::default() },
            ..SessionConfig::default()
        };
        let registry = RoomRegistry::new(config);
        let (tx, _rx) = channel();

        registry.create_room("lobby", conn(1), "ann", None, tx.clone()).await.unwrap();
        let result = registry.join_room("lobby", conn(2), "bob", false, None, tx).await;
        assert!(matches!(result, Err(RegistryError::RoomFull)));
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_room() {
        let config = SessionConfig {
            match_config: MatchConfig { max_players: 0, ..MatchConfig::default() },
            ..SessionConfig::default()
        };
        let registry = RoomRegistry::new(config);
        let (tx, _rx) = channel();

        let result = registry.create_room("lobby", conn(1), "ann", None, tx).await;
        assert!(matches!(result, Err(RegistryError::RoomFull)));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_last_leave_destroys_room() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        let seat = registry.create_room("lobby", conn(1), "ann", None, tx).await.unwrap();
        let generation = seat.room.read().await.game().generation();

        let leave = registry.leave("lobby", &conn(1)).await.unwrap();
        assert!(leave.departure.room_empty);
        assert_eq!(registry.room_count().await, 0);
        assert!(leave.room.read().await.is_closed());
        assert!(leave.room.read().await.game().generation() > generation);
        assert!(!registry.is_current("lobby", &leave.room).await);
        assert!(registry.rooms_of(&conn(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_room_id_reusable_after_destruction() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        let first = registry.create_room("lobby", conn(1), "ann", None, tx.clone()).await.unwrap();
        registry.leave("lobby", &conn(1)).await.unwrap();

        let second = registry.create_room("lobby", conn(2), "bob", None, tx).await.unwrap();
        assert!(!Arc::ptr_eq(&first.room, &second.room));
        assert!(registry.is_current("lobby", &second.room).await);
        assert!(!registry.is_current("lobby", &first.room).await);
    }

    #[tokio::test]
    async fn test_leave_not_in_room() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        registry.create_room("lobby", conn(1), "ann", None, tx).await.unwrap();
        let result = registry.leave("lobby", &conn(2)).await;
        assert!(matches!(result, Err(RegistryError::NotInRoom)));
        let result = registry.leave("elsewhere", &conn(1)).await;
        assert!(matches!(result, Err(RegistryError::RoomNotFound)));
    }

    #[tokio::test]
    async fn test_disconnect_leaves_every_room() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        registry.create_room("a", conn(1), "ann", None, tx.clone()).await.unwrap();
        registry.create_room("b", conn(2), "bob", None, tx.clone()).await.unwrap();
        registry.join_room("b", conn(1), "ann", false, None, tx).await.unwrap();
        assert_eq!(registry.rooms_of(&conn(1)).await.len(), 2);

        let mut leaves = registry.disconnect(&conn(1)).await;
        leaves.sort_by(|x, y| x.room_id.cmp(&y.room_id));
        assert_eq!(leaves.len(), 2);
        assert!(leaves[0].departure.room_empty);
        assert!(!leaves[1].departure.room_empty);

        assert_eq!(registry.room_count().await, 1);
        let room = registry.get("b").await.unwrap();
        assert_eq!(room.read().await.usernames(), vec!["bob"]);
        assert!(registry.disconnect(&conn(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_state_update_hides_face_down_cards() {
        let registry = RoomRegistry::default();
        let (tx, _rx) = channel();

        let seat = registry.create_room("lobby", conn(1), "ann", None, tx.clone()).await.unwrap();
        registry.join_room("lobby", conn(2), "bob", false, None, tx).await.unwrap();

        let mut session = seat.room.write().await;
        assert!(session.game_mut().start());
        session.game_mut().flip(conn(1), 3).unwrap();

        let update = session.state_update();
        assert_eq!(update.state, SessionPhase::Active);
        assert_eq!(update.deck_len, 16);
        assert_eq!(update.revealed.len(), 1);
        assert_eq!(update.revealed[0].id, 3);
        assert!(update.matched.is_empty());
        assert_eq!(update.current_player.as_deref(), Some("ann"));
        assert_eq!(update.current_turn, Some(0));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members() {
        let registry = RoomRegistry::default();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        let seat = registry.create_room("lobby", conn(1), "ann", None, tx1).await.unwrap();
        registry.join_room("lobby", conn(2), "bob", false, None, tx2).await.unwrap();

        seat.room.read().await.broadcast_state().await;
        assert!(matches!(rx1.recv().await, Some(ServerMessage::State(_))));
        assert!(matches!(rx2.recv().await, Some(ServerMessage::State(_))));
    }

    #[tokio::test]
    async fn test_broadcast_skips_full_queue() {
        let registry = RoomRegistry::default();
        let (tx1, mut rx1) = channel();
        let (tx2, _rx2) = mpsc::channel(1);

        let seat = registry.create_room("lobby", conn(1), "ann", None, tx1).await.unwrap();
        registry.join_room("lobby", conn(2), "bob", false, None, tx2.clone()).await.unwrap();
        assert!(tx2.try_send(ServerMessage::Restarted { room_id: "lobby".into() }).is_ok());

        let session = seat.room.read().await;
        let sent = tokio::time::timeout(Duration::from_secs(2), session.broadcast_state()).await;
        assert!(sent.is_ok(), "broadcast waited on a full queue");
        assert!(matches!(rx1.recv().await, Some(ServerMessage::State(_))));
    }

    #[test]
    fn test_env_var_parsing() {
        std::env::set_var("MEMORY_MATCH_TEST_DELAY", "250");
        std::env::set_var("MEMORY_MATCH_TEST_BAD", "soon");
        assert_eq!(env_var::<u64>("MEMORY_MATCH_TEST_DELAY"), Some(250));
        assert_eq!(env_var::<u64>("MEMORY_MATCH_TEST_BAD"), None);
        assert_eq!(env_var::<u64>("MEMORY_MATCH_TEST_UNSET"), None);
    }

    #[test]
    fn test_policy_names() {
        assert_eq!("pause".parse::<PolicyName>().map(|p| p.0), Ok(BelowMinimumPolicy::Pause));
        assert_eq!("Continue".parse::<PolicyName>().map(|p| p.0), Ok(BelowMinimumPolicy::Continue));
        assert!("stop".parse::<PolicyName>().is_err());
    }
}
