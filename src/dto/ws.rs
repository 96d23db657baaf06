use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dto::round::{Round, RoundId};

/// Heartbeat sent by the client.
pub const PING: &str = "ping";
/// Heartbeat reply; consumed by the transport.
pub const PONG: &str = "pong";
/// Server push: a round became active.
pub const GAME_START: &str = "game_start";
/// Server push: the current round was stopped.
pub const GAME_STOP: &str = "game_stop";
/// Client request to join the activity room.
pub const JOIN_ROOM: &str = "join_room";
/// Client request to leave the activity room.
pub const LEAVE_ROOM: &str = "leave_room";

/// Wire envelope shared by every inbound and outbound push message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope; a `null` payload is sent as an empty object.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        let payload = if payload.is_null() {
            Value::Object(Map::new())
        } else {
            payload
        };
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Parse a raw text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Serialize into a text frame.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Payload of a `game_start` push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GameStartPayload {
    #[serde(default)]
    pub round: Option<Round>,
}

/// Payload of a `game_stop` push.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct GameStopPayload {
    #[serde(rename = "roundId", default)]
    pub round_id: Option<RoundId>,
}

/// Payload of `join_room` / `leave_room`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub activity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
}
