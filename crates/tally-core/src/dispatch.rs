//! Applying validated messages to room state.
//!
//! One message in, one outcome out: a committed mutation (the caller
//! broadcasts a fresh snapshot), an ephemeral relay (the caller
//! broadcasts it without touching state), or a tagged ignore-reason.
//! No I/O here; the server crate holds the room lock across
//! validate-apply-broadcast.

use crate::ids::ParticipantKey;
use crate::protocol::{ClientMessage, IgnoreReason};
use crate::state::RoomState;

/// An ephemeral emoji relay, rebroadcast to the room and never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmojiThrow {
    /// The participant that sent the throw.
    pub sender_id: ParticipantKey,
    /// The participant being targeted.
    pub target_id: ParticipantKey,
    /// Emoji payload, relayed verbatim.
    pub emoji: String,
}

/// Outcome of applying one accepted message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Room state changed; broadcast a full snapshot.
    Mutated,
    /// Nothing stored; broadcast this relay only.
    Ephemeral(EmojiThrow),
}

impl RoomState {
    /// Apply one validated message attributed to `sender`.
    ///
    /// `vote` and `setUsername` require the sender to have a live
    /// player entry; `reveal` and `reset` only require the room, and
    /// are deliberately not gated to the admin.
    pub fn apply(
        &mut self,
        sender: &ParticipantKey,
        msg: ClientMessage,
    ) -> Result<Applied, IgnoreReason> {
        match msg {
            ClientMessage::Vote { vote } => {
                let player = self
                    .players
                    .get_mut(sender)
                    .ok_or_else(|| IgnoreReason::UnknownSender(sender.clone()))?;
                player.vote = Some(vote);
                Ok(Applied::Mutated)
            }

            ClientMessage::Reveal => {
                self.revealed = true;
                Ok(Applied::Mutated)
            }

            ClientMessage::Reset => {
                for player in self.players.values_mut() {
                    player.vote = None;
                }
                // Votes parked for briefly-offline players are cleared
                // too, so nothing cast before a reset ever resurfaces.
                for parked in self.retained.values_mut() {
                    parked.vote = None;
                }
                self.revealed = false;
                Ok(Applied::Mutated)
            }

            ClientMessage::SetUsername { username } => {
                let count = self.players.len();
                let player = self
                    .players
                    .get_mut(sender)
                    .ok_or_else(|| IgnoreReason::UnknownSender(sender.clone()))?;
                player.name = if username.is_empty() {
                    format!("Player {count}")
                } else {
                    username
                };
                Ok(Applied::Mutated)
            }

            ClientMessage::ThrowEmoji { target_id, emoji } => {
                if !self.players.contains_key(&target_id) {
                    return Err(IgnoreReason::UnknownTarget(target_id));
                }
                Ok(Applied::Ephemeral(EmojiThrow {
                    sender_id: sender.clone(),
                    target_id,
                    emoji,
                }))
            }
        }
    }
}
