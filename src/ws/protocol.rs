//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a connected participant, assigned by the server per connection
pub type ParticipantId = Uuid;

/// Short human-typable room code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Length of generated codes
    pub const LEN: usize = 5;
    /// Longest code accepted from clients
    pub const MAX_LEN: usize = 16;

    /// Normalize and validate a user-supplied code (case-insensitive)
    pub fn parse(raw: &str) -> Option<Self> {
        let code = raw.trim().to_ascii_uppercase();
        let valid = !code.is_empty()
            && code.len() <= Self::MAX_LEN
            && code.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then_some(Self(code))
    }

    /// Wrap a server-generated code that is already uppercase alphanumeric
    pub(crate) fn from_generated(code: String) -> Self {
        debug_assert!(code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("invalid room id: {:?}", raw))
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Create a new room and join it as host
    CreateRoom,

    /// Join an existing room by code
    JoinRoom { room_id: RoomId },

    /// Leave the lobby phase and start simulating
    StartGame { room_id: RoomId },

    /// Player input, fire-and-forget
    Input {
        /// Request an upward impulse on the next tick
        #[serde(default)]
        flap: bool,
    },

    /// Reset every player and the obstacle lane (host only)
    RestartGame,

    /// Leave the current room
    LeaveRoom,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        participant_id: ParticipantId,
        server_time: u64,
    },

    /// A room was created on the caller's request
    RoomCreated { room_id: RoomId },

    /// Join or start against a room that does not exist
    RoomNotFound { room_id: RoomId },

    /// Full snapshot sent once to a joining participant
    Init { state: RoomSnapshot },

    /// Full snapshot sent every tick while the room is started
    Update { state: RoomSnapshot },

    /// Player joined the room
    PlayerJoined { player: PlayerInfo },

    /// Player left the room
    PlayerLeft { participant_id: ParticipantId },

    /// The room left its lobby phase
    GameStarted { tick: u64 },

    /// A player collided and is now frozen
    PlayerEliminated {
        participant_id: ParticipantId,
        score: u32,
    },

    /// Every player in the room is dead
    GameOver { results: Vec<PlayerResult> },

    /// Players and obstacles were reset to spawn defaults
    RoomRestarted { tick: u64 },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Player info for join notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub participant_id: ParticipantId,
    pub display_name: String,
}

/// Full authoritative room state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    /// Server tick number
    pub tick: u64,
    /// False while the room is in its lobby phase
    pub started: bool,
    /// Member allowed to restart the room
    pub host_id: Option<ParticipantId>,
    /// Players in join order
    pub players: Vec<PlayerSnapshot>,
    /// Obstacles in increasing x order
    pub pipes: Vec<PipeSnapshot>,
}

impl RoomSnapshot {
    pub fn player(&self, participant_id: ParticipantId) -> Option<&PlayerSnapshot> {
        self.players
            .iter()
            .find(|p| p.participant_id == participant_id)
    }
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// Position X
    pub x: f32,
    /// Position Y (grows downward)
    pub y: f32,
    /// Vertical velocity in px/s
    pub vel_y: f32,
    pub score: u32,
    pub alive: bool,
    /// Unix millis until which collisions are ignored
    pub invincible_until: u64,
}

/// Obstacle state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeSnapshot {
    pub id: u64,
    pub x: f32,
    /// Vertical center of the gap
    pub gap_y: f32,
    pub gap_height: f32,
    /// Players already credited for clearing this pipe
    pub passed_by: Vec<ParticipantId>,
}

/// Final score line in a game over notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_case_insensitive() {
        let id = RoomId::parse("  ab3x9 ").unwrap();
        assert_eq!(id.as_str(), "AB3X9");
        assert!(RoomId::parse("").is_none());
        assert!(RoomId::parse("has space").is_none());
        assert!(RoomId::parse(&"A".repeat(RoomId::MAX_LEN + 1)).is_none());
    }

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"join_room","room_id":"abcde"}"#).unwrap();
        match msg {
            ClientMsg::JoinRoom { room_id } => assert_eq!(room_id.as_str(), "ABCDE"),
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"input"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Input { flap: false }));

        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"join_room","room_id":"!!"}"#).is_err());
    }

    #[test]
    fn server_message_shape() {
        let msg = ServerMsg::PlayerLeft {
            participant_id: Uuid::nil(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "player_left");
        assert_eq!(json["participant_id"], Uuid::nil().to_string());

        let json = serde_json::to_value(ServerMsg::RoomCreated {
            room_id: RoomId::parse("QWERT").unwrap(),
        })
        .unwrap();
        assert_eq!(json["room_id"], "QWERT");
    }
}
