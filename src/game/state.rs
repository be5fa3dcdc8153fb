//! Game State Definitions
//!
//! The per-room turn state machine: roster, turn order, deck, reveal and
//! match bookkeeping, and winner computation.
//!
//! ```text
//! Waiting ──start──▶ Active ──2nd flip──▶ Resolving ──resolve──▶ Active
//!                      ▲                                  │
//!                      └──────────restart─── Finished ◀───┘ (all matched)
//! ```
//!
//! Every public operation is total: invalid game actions return `None` or
//! `false` and leave the state untouched.

use std::collections::BTreeSet;
use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::rng::DeterministicRng;
use crate::game::deck::{self, Card, Symbol, DEFAULT_CARD_COUNT};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Room identifier, chosen by clients.
pub type RoomId = String;

/// Transport-scoped connection identifier (UUID as bytes).
///
/// Not a stable identity: a reconnecting client gets a fresh id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct ConnectionId(pub [u8; 16]);

impl ConnectionId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Allocate a fresh random id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First four bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// What happens when departures leave fewer than `min_players` in a room.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BelowMinimumPolicy {
    /// Drop back to `Waiting` until someone joins and the room is started again.
    #[default]
    Pause,
    /// Keep playing with whoever is left.
    Continue,
}

/// Rules for a single match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchConfig {
    /// Players required to start.
    pub min_players: usize,
    /// Roster cap.
    pub max_players: usize,
    /// Requested deck size (normalized by the deck generator).
    pub card_count: usize,
    /// Behavior when the roster drops under `min_players`.
    pub below_minimum: BelowMinimumPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 8,
            card_count: DEFAULT_CARD_COUNT,
            below_minimum: BelowMinimumPolicy::Pause,
        }
    }
}

// =============================================================================
// PLAYER / PHASE
// =============================================================================

/// A participant in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Connection that owns this seat.
    pub connection_id: ConnectionId,
    /// Client-supplied display name.
    pub username: String,
    /// Pairs found in the current match.
    pub score: u32,
}

/// Session phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Waiting for enough players and a start.
    Waiting,
    /// Current player may flip.
    Active,
    /// Two cards are face up; flips are rejected until resolution.
    Resolving,
    /// Every card is matched.
    Finished,
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Stamp carried by a deferred resolution.
///
/// A ticket only applies to the generation it was issued in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolveTicket {
    /// Session generation at issue time.
    pub generation: u64,
}

/// Accepted flip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlipOutcome {
    /// First card of the pair is face up.
    Revealed(Card),
    /// Second card is face up; schedule `resolve` with the ticket.
    PairRevealed(Card, ResolveTicket),
}

/// Result of resolving a revealed pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Symbols matched.
    Matched {
        /// Username credited, if the revealer is still seated.
        by: Option<String>,
        /// Matched symbol.
        symbol: Symbol,
        /// The two matched card ids.
        cards: [u32; 2],
    },
    /// Symbols differed; the cards flip back.
    Mismatched {
        /// Username whose turn it now is.
        next_player: Option<String>,
    },
}

/// Result of removing a player.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Departure {
    /// The removed player.
    pub player: Player,
    /// The player held the current turn.
    pub was_current_turn: bool,
    /// No players remain; the room must be destroyed.
    pub room_empty: bool,
    /// The room dropped back to `Waiting`.
    pub paused: bool,
}

/// Engine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Roster is at capacity.
    #[error("Room is full")]
    RoomFull,

    /// Internal state broke an invariant; the mutation was refused.
    #[error("Invariant violation: {0}")]
    InvariantViolation(&'static str),
}

// =============================================================================
// GAME SESSION
// =============================================================================

/// Authoritative state of one room.
#[derive(Clone, Debug)]
pub struct GameSession {
    id: RoomId,
    config: MatchConfig,
    rng: DeterministicRng,
    players: Vec<Player>,
    turn_order: Vec<ConnectionId>,
    current_turn: usize,
    deck: Vec<Card>,
    revealed: Vec<u32>,
    matched: BTreeSet<u32>,
    phase: SessionPhase,
    winners: Vec<String>,
    generation: u64,
    revealer: Option<ConnectionId>,
}

impl GameSession {
    /// Create a room with a freshly shuffled deck.
    pub fn new(id: impl Into<RoomId>, config: MatchConfig, mut rng: DeterministicRng) -> Self {
        let deck = deck::generate(config.card_count, &mut rng);
        Self::with_deck(id, config, deck, rng)
    }

    /// Create a room around a prepared deck. Restarts still draw from `rng`.
    pub fn with_deck(
        id: impl Into<RoomId>,
        config: MatchConfig,
        deck: Vec<Card>,
        rng: DeterministicRng,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            rng,
            players: Vec::new(),
            turn_order: Vec::new(),
            current_turn: 0,
            deck,
            revealed: Vec::with_capacity(2),
            matched: BTreeSet::new(),
            phase: SessionPhase::Waiting,
            winners: Vec::new(),
            generation: 0,
            revealer: None,
        }
    }

    /// Seat a player. Returns `Ok(false)` if the connection is already seated.
    pub fn join(&mut self, connection_id: ConnectionId, username: impl Into<String>) -> Result<bool, GameError> {
        if self.player_index(&connection_id).is_some() {
            return Ok(false);
        }
        if self.players.len() >= self.config.max_players {
            return Err(GameError::RoomFull);
        }

        if self.turn_order.is_empty() {
            self.current_turn = 0;
        }
        self.players.push(Player {
            connection_id,
            username: username.into(),
            score: 0,
        });
        self.turn_order.push(connection_id);
        Ok(true)
    }

    /// Begin play. Returns `false` if the room is not waiting or is short of players.
    pub fn start(&mut self) -> bool {
        if self.phase != SessionPhase::Waiting || !self.has_enough_players() {
            return false;
        }
        self.phase = SessionPhase::Active;
        self.current_turn = 0;
        true
    }

    /// Reveal a card. Returns `None` for any invalid flip.
    pub fn flip(&mut self, connection_id: ConnectionId, card_index: usize) -> Option<FlipOutcome> {
        if self.phase != SessionPhase::Active {
            return None;
        }
        if self.current_connection() != Some(connection_id) {
            return None;
        }
        let card = *self.deck.get(card_index)?;
        if self.matched.contains(&card.id) || self.revealed.contains(&card.id) || self.revealed.len() >= 2 {
            return None;
        }

        self.revealed.push(card.id);
        self.revealer = Some(connection_id);

        if self.revealed.len() == 2 {
            self.phase = SessionPhase::Resolving;
            Some(FlipOutcome::PairRevealed(card, ResolveTicket { generation: self.generation }))
        } else {
            Some(FlipOutcome::Revealed(card))
        }
    }

    /// Evaluate the revealed pair.
    ///
    /// `Ok(None)` means the ticket is stale (restart, destruction, or already
    /// resolved) and nothing changed.
    pub fn resolve(&mut self, ticket: ResolveTicket) -> Result<Option<Resolution>, GameError> {
        if ticket.generation != self.generation || self.phase != SessionPhase::Resolving {
            return Ok(None);
        }
        let (first, second) = match self.revealed[..] {
            [first, second] => (first, second),
            _ => return Err(GameError::InvariantViolation("resolving without exactly two revealed cards")),
        };
        let (a, b) = match (self.deck.get(first as usize), self.deck.get(second as usize)) {
            (Some(a), Some(b)) => (*a, *b),
            _ => return Err(GameError::InvariantViolation("revealed card outside the deck")),
        };

        let revealer = self.revealer.take();
        self.revealed.clear();
        self.phase = SessionPhase::Active;

        let resolution = if a.symbol == b.symbol {
            self.matched.insert(a.id);
            self.matched.insert(b.id);

            let by = revealer
                .and_then(|id| self.player_index(&id))
                .map(|idx| {
                    let player = &mut self.players[idx];
                    player.score += 1;
                    player.username.clone()
                });

            Resolution::Matched { by, symbol: a.symbol, cards: [a.id, b.id] }
        } else {
            // A departed revealer already handed the turn on.
            if revealer.is_some() && self.current_connection() == revealer {
                self.advance_turn();
            }
            Resolution::Mismatched {
                next_player: self.current_player().map(|p| p.username.clone()),
            }
        };

        if self.matched.len() == self.deck.len() {
            self.finish();
        } else {
            self.pause_if_short();
        }

        Ok(Some(resolution))
    }

    /// Deal a new deck and zero scores, keeping the roster.
    ///
    /// Play resumes immediately, except that a room short of `min_players`
    /// under the `Pause` policy waits for a new start.
    pub fn restart(&mut self) {
        self.deck = deck::generate(self.config.card_count, &mut self.rng);
        self.revealed.clear();
        self.matched.clear();
        self.winners.clear();
        self.revealer = None;
        for player in &mut self.players {
            player.score = 0;
        }
        self.current_turn = 0;
        self.phase = if self.config.below_minimum == BelowMinimumPolicy::Pause && !self.has_enough_players() {
            SessionPhase::Waiting
        } else {
            SessionPhase::Active
        };
        self.generation += 1;
    }

    /// Remove a player from the roster and turn order.
    pub fn remove_player(&mut self, connection_id: &ConnectionId) -> Option<Departure> {
        let idx = self.player_index(connection_id)?;
        let player = self.players.remove(idx);

        let mut was_current_turn = false;
        if let Some(pos) = self.turn_order.iter().position(|id| id == connection_id) {
            self.turn_order.remove(pos);
            if pos < self.current_turn {
                self.current_turn -= 1;
            } else if pos == self.current_turn {
                was_current_turn = true;
                if self.current_turn >= self.turn_order.len() {
                    self.current_turn = 0;
                }
            }
        }

        if self.turn_order.is_empty() {
            self.current_turn = 0;
            self.invalidate_pending();
            return Some(Departure { player, was_current_turn, room_empty: true, paused: false });
        }

        // A half-finished reveal belongs to the departed player's turn.
        if was_current_turn && self.phase == SessionPhase::Active {
            self.revealed.clear();
            self.revealer = None;
        }

        let paused = self.pause_if_short();
        Some(Departure { player, was_current_turn, room_empty: false, paused })
    }

    /// Void every outstanding resolution ticket.
    pub fn invalidate_pending(&mut self) {
        self.generation += 1;
    }

    fn finish(&mut self) {
        self.phase = SessionPhase::Finished;
        let max_score = self.players.iter().map(|p| p.score).max().unwrap_or(0);
        self.winners = self
            .players
            .iter()
            .filter(|p| p.score == max_score)
            .map(|p| p.username.clone())
            .collect();
    }

    fn pause_if_short(&mut self) -> bool {
        let should_pause = self.phase == SessionPhase::Active
            && self.config.below_minimum == BelowMinimumPolicy::Pause
            && !self.has_enough_players();
        if should_pause {
            self.phase = SessionPhase::Waiting;
            self.revealed.clear();
            self.revealer = None;
        }
        should_pause
    }

    fn advance_turn(&mut self) {
        if !self.turn_order.is_empty() {
            self.current_turn = (self.current_turn + 1) % self.turn_order.len();
        }
    }

    fn has_enough_players(&self) -> bool {
        self.players.len() >= self.config.min_players.max(1)
    }

    fn player_index(&self, connection_id: &ConnectionId) -> Option<usize> {
        self.players.iter().position(|p| &p.connection_id == connection_id)
    }

    fn current_connection(&self) -> Option<ConnectionId> {
        self.turn_order.get(self.current_turn).copied()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Match rules.
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Roster in join order.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Look up a seated player.
    pub fn player(&self, connection_id: &ConnectionId) -> Option<&Player> {
        self.player_index(connection_id).map(|idx| &self.players[idx])
    }

    /// Turn order.
    pub fn turn_order(&self) -> &[ConnectionId] {
        &self.turn_order
    }

    /// Index into the turn order of the player to act.
    pub fn current_turn_index(&self) -> usize {
        self.current_turn
    }

    /// Player whose turn it is.
    pub fn current_player(&self) -> Option<&Player> {
        self.current_connection().and_then(|id| self.player(&id))
    }

    /// Full deck, including face-down symbols. Never send this to clients.
    pub fn deck(&self) -> &[Card] {
        &self.deck
    }

    /// Face-up, unmatched card ids in reveal order.
    pub fn revealed(&self) -> &[u32] {
        &self.revealed
    }

    /// Permanently face-up card ids.
    pub fn matched(&self) -> &BTreeSet<u32> {
        &self.matched
    }

    /// Usernames with the top score once finished.
    pub fn winners(&self) -> &[String] {
        &self.winners
    }

    /// Generation counter for resolution tickets.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the match is over.
    pub fn is_finished(&self) -> bool {
        self.phase == SessionPhase::Finished
    }

    /// Look up a card that clients may see (revealed or matched).
    pub fn visible_card(&self, card_id: u32) -> Option<Card> {
        if self.revealed.contains(&card_id) || self.matched.contains(&card_id) {
            self.deck.get(card_id as usize).copied()
        } else {
            None
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
