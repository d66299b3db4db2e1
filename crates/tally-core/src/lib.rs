//! # tally-core
//!
//! Foundation types and pure room logic for the tally estimation server.
//!
//! This crate holds everything that can be reasoned about without a
//! socket in hand:
//!
//! - **Branded IDs**: `RoomId`, `ParticipantKey`, `ConnectionId` as newtypes
//! - **Room state**: `RoomState` with players, admin, and the reveal flag
//! - **Wire protocol**: `ClientMessage` / `ServerMessage` and the snapshot types
//! - **Dispatch**: applying one validated message to a room, yielding either
//!   a mutation, an ephemeral relay, or a tagged ignore-reason
//!
//! No I/O happens here; the server crate drives these types from its
//! per-room serialization context.

#![deny(unsafe_code)]

pub mod dispatch;
pub mod ids;
pub mod protocol;
pub mod state;

pub use dispatch::{Applied, EmojiThrow};
pub use ids::{ConnectionId, ParticipantKey, RoomId};
pub use protocol::{ClientMessage, IgnoreReason, PlayerView, RoomSnapshot, ServerMessage};
pub use state::{Participant, RoomState};
