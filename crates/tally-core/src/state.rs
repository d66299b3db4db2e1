//! Authoritative per-room state.
//!
//! One [`RoomState`] holds a single round of estimates: the admin key,
//! the live player map, and the reveal flag. The admin is whoever was
//! admitted first and is never reassigned or cleared afterwards; a
//! departed admin reclaims the role by presenting the same key again.
//!
//! Departed players are parked in a retained store for the lifetime of
//! the room so a reconnect with the same key gets its name and last
//! vote back instead of a fresh default entry.

use std::collections::HashMap;

use crate::ids::ParticipantKey;
use crate::protocol::{PlayerView, RoomSnapshot};

/// One participant's identity within a room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    /// Display name, defaulted to `"Player N"` on first admission.
    pub name: String,
    /// Current estimate; free-form text, `None` until cast.
    pub vote: Option<String>,
}

/// The authoritative aggregate for one room.
#[derive(Debug, Default)]
pub struct RoomState {
    pub(crate) admin_id: Option<ParticipantKey>,
    pub(crate) players: HashMap<ParticipantKey, Participant>,
    pub(crate) revealed: bool,
    /// Entries of departed participants, kept so a reconnect with the
    /// same key restores name and vote. Soft state, dies with the room.
    pub(crate) retained: HashMap<ParticipantKey, Participant>,
}

impl RoomState {
    /// Create an empty room.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a resolved participant key.
    ///
    /// Creates a `Participant` for the key if it has none, restoring a
    /// retained entry when the key departed earlier in this room's
    /// lifetime. The first key ever admitted becomes admin; the admin
    /// slot is never reassigned after that.
    pub fn admit(&mut self, key: &ParticipantKey) {
        if !self.players.contains_key(key) {
            let entry = self.retained.remove(key).unwrap_or_else(|| Participant {
                name: format!("Player {}", self.players.len() + 1),
                vote: None,
            });
            let _ = self.players.insert(key.clone(), entry);
        }
        if self.admin_id.is_none() {
            self.admin_id = Some(key.clone());
        }
    }

    /// Remove a participant whose last connection closed.
    ///
    /// The entry moves to the retained store; `admin_id` is left
    /// untouched even when the admin departs.
    pub fn remove(&mut self, key: &ParticipantKey) {
        if let Some(entry) = self.players.remove(key) {
            let _ = self.retained.insert(key.clone(), entry);
        }
    }

    /// The admin key, if any participant has ever been admitted.
    #[must_use]
    pub fn admin_id(&self) -> Option<&ParticipantKey> {
        self.admin_id.as_ref()
    }

    /// Whether the round is revealed.
    #[must_use]
    pub fn revealed(&self) -> bool {
        self.revealed
    }

    /// Number of live participants.
    #[must_use]
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Look up a live participant.
    #[must_use]
    pub fn player(&self, key: &ParticipantKey) -> Option<&Participant> {
        self.players.get(key)
    }

    /// Full snapshot of the visible state, as broadcast to clients.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            admin_id: self.admin_id.clone(),
            players: self
                .players
                .iter()
                .map(|(key, p)| {
                    (
                        key.clone(),
                        PlayerView {
                            name: p.name.clone(),
                            vote: p.vote.clone(),
                        },
                    )
                })
                .collect(),
            revealed: self.revealed,
        }
    }
}
