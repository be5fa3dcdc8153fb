//! # Memory Match Game Server
//!
//! Authoritative engine for a real-time multiplayer memory-match ("pairs")
//! game, served over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MEMORY MATCH SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                │
//! │  └── rng.rs        - Xorshift128+ PRNG, seed derivation      │
//! │                                                              │
//! │  game/             - Match rules (no I/O)                    │
//! │  ├── deck.rs       - Symbol catalog and shuffled decks       │
//! │  ├── state.rs      - Turn state machine and resolution       │
//! │  └── leaderboard.rs- Cross-match win tally                   │
//! │                                                              │
//! │  network/          - Networking (timers, sockets)            │
//! │  ├── server.rs     - WebSocket server and action routing     │
//! │  ├── protocol.rs   - Message types                           │
//! │  └── session.rs    - Rooms and the room registry             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority
//!
//! Clients send intents (create, join, start, flip, restart, leave).
//! The server validates every flip against the authoritative deck and
//! only ever sends symbols for face-up cards. A revealed pair resolves
//! after a fixed delay through a generation-stamped ticket, so restarts
//! and room destruction void pending resolutions.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::deck::{Card, Symbol};
pub use game::leaderboard::{Leaderboard, LeaderboardEntry};
pub use game::state::{ConnectionId, GameSession, MatchConfig, SessionPhase};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default reveal delay before a pair resolves (milliseconds)
pub const REVEAL_DELAY_MS: u64 = 750;
