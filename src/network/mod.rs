//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! This layer owns timing and I/O; all rules run through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientMessage, ServerMessage, ErrorCode, RoomStateUpdate};
pub use session::{RoomRegistry, RoomSession, RegistryError, SessionConfig, SharedRoom};
pub use server::{GameServer, ServerConfig, GameServerError};
