//! Game Logic Module
//!
//! The match engine. No I/O and no clocks except the leaderboard's win
//! timestamps; the network layer drives everything here.
//!
//! ## Module Structure
//!
//! - `deck`: Symbol catalog and shuffled deck generation
//! - `state`: Per-room turn state machine and resolution
//! - `leaderboard`: Cross-match win tally

pub mod deck;
pub mod state;
pub mod leaderboard;

// Re-export key types
pub use deck::{Card, Symbol, DEFAULT_CARD_COUNT, MAX_CARD_COUNT, MIN_CARD_COUNT};
pub use state::{
    BelowMinimumPolicy, ConnectionId, Departure, FlipOutcome, GameError, GameSession,
    MatchConfig, Player, Resolution, ResolveTicket, RoomId, SessionPhase,
};
pub use leaderboard::{Leaderboard, LeaderboardEntry, DEFAULT_LEADERBOARD_LIMIT};
