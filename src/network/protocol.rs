//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease,
//! with optional binary (bincode) for flat payloads.
//!
//! Card symbols only travel for cards that are face up (revealed or
//! matched). The deck itself is never sent.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::game::leaderboard::LeaderboardEntry;
use crate::game::state::SessionPhase;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new room; fails if the id is taken.
    CreateRoom(RoomRequest),

    /// Join an existing room.
    JoinRoom(JoinRequest),

    /// Start the match.
    Start { room_id: String },

    /// Reveal a card.
    Flip(FlipRequest),

    /// Deal a new deck for the same roster.
    Restart { room_id: String },

    /// Leave one room without disconnecting.
    Leave { room_id: String },

    /// Read the leaderboard.
    Leaderboard {
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

/// Room creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRequest {
    /// Room to create.
    pub room_id: String,
    /// Display name.
    pub username: String,
    /// Requested deck size.
    #[serde(default)]
    pub card_count: Option<usize>,
}

/// Room join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Room to join.
    pub room_id: String,
    /// Display name.
    pub username: String,
    /// Deck size if the room gets created.
    #[serde(default)]
    pub card_count: Option<usize>,
    /// Create the room when it does not exist.
    #[serde(default)]
    pub create_if_missing: bool,
}

/// Card flip request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipRequest {
    /// Room the card belongs to.
    pub room_id: String,
    /// Position of the card in the deck.
    pub card_index: usize,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to a create/join/leave request.
    Ack(AckInfo),

    /// Full room state after every accepted change.
    State(RoomStateUpdate),

    /// Revealed pair matched.
    Match(MatchInfo),

    /// Revealed pair flipped back.
    NoMatch {
        room_id: String,
        next_player: Option<String>,
    },

    /// Every card is matched.
    GameOver(GameOverInfo),

    /// Room was dealt a fresh deck.
    Restarted { room_id: String },

    /// Informational notice for a room.
    Info { room_id: String, message: String },

    /// Leaderboard snapshot.
    Leaderboard(LeaderboardSnapshot),

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Request acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckInfo {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Room the request named.
    pub room_id: String,
    /// This connection's id, so clients can spot their own turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Usernames in the room after the request.
    #[serde(default)]
    pub players: Vec<String>,
    /// Error code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorCode>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AckInfo {
    /// Successful acknowledgement.
    pub fn success(room_id: impl Into<String>, connection_id: String, players: Vec<String>) -> Self {
        Self {
            ok: true,
            room_id: room_id.into(),
            connection_id: Some(connection_id),
            players,
            error: None,
            message: None,
        }
    }

    /// Failed acknowledgement.
    pub fn failure(room_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            room_id: room_id.into(),
            connection_id: None,
            players: Vec::new(),
            error: Some(code),
            message: Some(message.into()),
        }
    }
}

/// Public view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStateUpdate {
    /// Room identifier.
    pub room_id: String,
    /// Current phase.
    pub state: SessionPhase,
    /// Roster with scores, in join order.
    pub players: Vec<PlayerView>,
    /// Index into the turn order of the player to act.
    pub current_turn: Option<usize>,
    /// Username of the player to act.
    pub current_player: Option<String>,
    /// Face-up, unmatched cards.
    pub revealed: Vec<CardView>,
    /// Matched cards.
    pub matched: Vec<CardView>,
    /// Number of cards on the table.
    pub deck_len: usize,
    /// Winners once finished.
    pub winners: Vec<String>,
}

/// Player in a state update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Display name.
    pub username: String,
    /// Pairs found this match.
    pub score: u32,
}

/// Face-up card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardView {
    /// Card position.
    pub id: u32,
    /// Card glyph.
    pub symbol: String,
}

/// Matched pair notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchInfo {
    /// Room identifier.
    pub room_id: String,
    /// Player credited, if still seated.
    pub by: Option<String>,
    /// Matched glyph.
    pub symbol: String,
    /// Matched card ids.
    pub cards: [u32; 2],
}

/// End of match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOverInfo {
    /// Room identifier.
    pub room_id: String,
    /// Every player tied for the top score.
    pub winners: Vec<String>,
    /// When the last pair was matched.
    pub finished_at: DateTime<Utc>,
}

/// Leaderboard snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    /// Entries by wins, descending.
    pub entries: Vec<LeaderboardEntry>,
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or incomplete request.
    InvalidInput,
    /// Room does not exist.
    RoomNotFound,
    /// Room id already taken.
    RoomExists,
    /// Room roster is full.
    RoomFull,
    /// Connection is not seated in the room.
    NotInRoom,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize a binary frame. Binary frames carry a bincode `FlipRequest`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize::<FlipRequest>(data).map(ClientMessage::Flip)
    }

    /// Room this message targets, if any.
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ClientMessage::CreateRoom(req) => Some(&req.room_id),
            ClientMessage::JoinRoom(req) => Some(&req.room_id),
            ClientMessage::Flip(req) => Some(&req.room_id),
            ClientMessage::Start { room_id }
            | ClientMessage::Restart { room_id }
            | ClientMessage::Leave { room_id } => Some(room_id),
            ClientMessage::Leaderboard { .. } | ClientMessage::Ping { .. } => None,
        }
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::Flip(FlipRequest { room_id: "den".into(), card_index: 3 });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"flip\""));
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::Flip(req) = parsed {
            assert_eq!(req.room_id, "den");
            assert_eq!(req.card_index, 3);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_join_defaults() {
        let parsed = ClientMessage::from_json(
            r#"{"type":"join_room","room_id":"den","username":"ann"}"#,
        )
        .unwrap();

        if let ClientMessage::JoinRoom(req) = parsed {
            assert!(!req.create_if_missing);
            assert!(req.card_count.is_none());
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"create_room","room_id":"den"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"flip","room_id":"den"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"type":"warp"}"#).is_err());
    }

    #[test]
    fn test_leaderboard_request_without_limit() {
        let parsed = ClientMessage::from_json(r#"{"type":"leaderboard"}"#).unwrap();
        assert!(matches!(parsed, ClientMessage::Leaderboard { limit: None }));
        assert!(parsed.room_id().is_none());
    }

    #[test]
    fn test_room_id_accessor() {
        let msg = ClientMessage::Restart { room_id: "den".into() };
        assert_eq!(msg.room_id(), Some("den"));
    }

    #[test]
    fn test_binary_serialization_flip() {
        // Tagged enums (#[serde(tag = "type")]) are not supported by bincode,
        // so binary frames carry the flat flip payload only.
        let req = FlipRequest { room_id: "den".into(), card_index: 7 };

        let bytes = bincode::serialize(&req).unwrap();
        match ClientMessage::from_bytes(&bytes).unwrap() {
            ClientMessage::Flip(parsed) => assert_eq!(parsed, req),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(ClientMessage::from_bytes(&[1, 2]).is_err());
    }

    #[test]
    fn test_state_update_shape() {
        let update = RoomStateUpdate {
            room_id: "den".into(),
            state: SessionPhase::Resolving,
            players: vec![PlayerView { username: "ann".into(), score: 1 }],
            current_turn: Some(0),
            current_player: Some("ann".into()),
            revealed: vec![CardView { id: 2, symbol: "🍎".into() }],
            matched: Vec::new(),
            deck_len: 16,
            winners: Vec::new(),
        };

        let json = ServerMessage::State(update.clone()).to_json().unwrap();
        assert!(json.contains("\"type\":\"state\""));
        assert!(json.contains("\"state\":\"resolving\""));

        match ServerMessage::from_json(&json).unwrap() {
            ServerMessage::State(parsed) => assert_eq!(parsed, update),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_error_codes() {
        let json = ServerMessage::error(ErrorCode::RoomNotFound, "Room not found")
            .to_json()
            .unwrap();
        assert!(json.contains("room_not_found"));
    }

    #[test]
    fn test_failed_ack_omits_connection() {
        let ack = AckInfo::failure("den", ErrorCode::RoomExists, "Room already exists");
        let json = ServerMessage::Ack(ack).to_json().unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("room_exists"));
        assert!(!json.contains("connection_id"));
    }
}
