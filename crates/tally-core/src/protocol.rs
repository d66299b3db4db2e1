//! Wire-format types for the room protocol.
//!
//! Clients send small JSON objects discriminated by a `type` field; the
//! server answers exclusively with full-state snapshots and ephemeral
//! relays. Inbound parsing is deliberately a two-step affair: the
//! envelope is inspected first, then each field is validated
//! individually so a bad message degrades into a tagged
//! [`IgnoreReason`] instead of an error reply — the protocol has none.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::ParticipantKey;

/// Why an inbound message was dropped.
///
/// Never surfaced to the sender; logged and counted server-side.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IgnoreReason {
    /// Body is not a JSON object carrying a string `type`.
    #[error("message is not a JSON object with a string `type`")]
    Malformed,

    /// The `type` value names no known message kind.
    #[error("unknown message type `{0}`")]
    UnknownKind(String),

    /// A required field is missing or not a string.
    #[error("field `{field}` of `{kind}` is missing or not a string")]
    InvalidField {
        /// Message kind being parsed.
        kind: &'static str,
        /// Offending field name.
        field: &'static str,
    },

    /// A participant-scoped message arrived from a key with no entry.
    #[error("sender `{0}` has no player entry")]
    UnknownSender(ParticipantKey),

    /// The ephemeral relay names a target not currently in the room.
    #[error("target `{0}` is not in the room")]
    UnknownTarget(ParticipantKey),
}

/// A validated inbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Cast or replace the sender's estimate.
    Vote {
        /// Free-form estimate text.
        vote: String,
    },
    /// Flip the room to revealed.
    Reveal,
    /// Clear every vote and return to voting.
    Reset,
    /// Rename the sender.
    SetUsername {
        /// Requested display name; empty falls back to a default.
        username: String,
    },
    /// Relay an emoji throw at another participant.
    ThrowEmoji {
        /// Key of the participant being targeted.
        target_id: ParticipantKey,
        /// Emoji payload, relayed verbatim.
        emoji: String,
    },
}

impl ClientMessage {
    /// Parse one inbound text frame.
    ///
    /// Field validation is per-field: a `vote` whose `vote` is a number
    /// is dropped as [`IgnoreReason::InvalidField`], not as malformed
    /// JSON.
    pub fn parse(text: &str) -> Result<Self, IgnoreReason> {
        let value: Value = serde_json::from_str(text).map_err(|_| IgnoreReason::Malformed)?;
        let Some(obj) = value.as_object() else {
            return Err(IgnoreReason::Malformed);
        };
        let Some(kind) = obj.get("type").and_then(Value::as_str) else {
            return Err(IgnoreReason::Malformed);
        };

        match kind {
            "vote" => Ok(Self::Vote {
                vote: required_str(obj, "vote", "vote")?.to_owned(),
            }),
            "reveal" => Ok(Self::Reveal),
            "reset" => Ok(Self::Reset),
            "setUsername" => Ok(Self::SetUsername {
                username: required_str(obj, "setUsername", "username")?.to_owned(),
            }),
            "throwEmoji" => Ok(Self::ThrowEmoji {
                target_id: ParticipantKey::from(required_str(obj, "throwEmoji", "targetId")?),
                emoji: required_str(obj, "throwEmoji", "emoji")?.to_owned(),
            }),
            other => Err(IgnoreReason::UnknownKind(other.to_owned())),
        }
    }
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    kind: &'static str,
    field: &'static str,
) -> Result<&'a str, IgnoreReason> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or(IgnoreReason::InvalidField { kind, field })
}

/// One player as rendered in a state snapshot.
///
/// `vote` is always serialized, `null` until cast — clients key their
/// "has voted" indicator off its presence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    /// Display name.
    pub name: String,
    /// Current estimate, `null` until cast.
    pub vote: Option<String>,
}

/// Full visible room state, broadcast after every committed mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Admin key; `null` only before anyone has joined.
    #[serde(rename = "adminId")]
    pub admin_id: Option<ParticipantKey>,
    /// Live players keyed by participant key.
    pub players: BTreeMap<ParticipantKey, PlayerView>,
    /// Whether votes are currently revealed.
    pub revealed: bool,
}

/// An outbound frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Connect-time hello carrying the resolved participant key, so a
    /// client can present it again to reconnect as the same identity.
    /// Sent once, to the joining connection only.
    #[serde(rename = "welcome")]
    Welcome {
        /// The key this connection resolved to.
        #[serde(rename = "playerId")]
        player_id: ParticipantKey,
        /// RFC 3339 connect time.
        timestamp: String,
    },

    /// Full-state snapshot.
    #[serde(rename = "state")]
    State {
        /// The snapshot body.
        state: RoomSnapshot,
    },

    /// Ephemeral emoji relay; never stored in room state.
    #[serde(rename = "throwEmoji")]
    ThrowEmoji {
        /// Who threw it.
        #[serde(rename = "senderId")]
        sender_id: ParticipantKey,
        /// Who it was thrown at.
        #[serde(rename = "targetId")]
        target_id: ParticipantKey,
        /// Emoji payload.
        emoji: String,
    },
}
