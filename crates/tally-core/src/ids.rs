//! Branded ID newtypes for type safety.
//!
//! Rooms, participants, and transport connections are all addressed by
//! opaque strings on the wire. Each gets a distinct newtype so a
//! connection id can never be passed where a participant key is
//! expected. Server-minted values are UUID v7 (time-ordered) via
//! [`uuid::Uuid::now_v7`]; caller-supplied values are stored verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Opaque key identifying one room (the URL path segment).
    RoomId
}

branded_id! {
    /// Stable identity of a participant within a room.
    ///
    /// Survives transport reconnects when the caller presents it again
    /// at connect time.
    ParticipantKey
}

branded_id! {
    /// Identity of one live transport connection.
    ConnectionId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_key_new_is_uuid_v7() {
        let key = ParticipantKey::new();
        let parsed = Uuid::parse_str(key.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn minted_keys_are_unique() {
        let a = ParticipantKey::new();
        let b = ParticipantKey::new();
        assert_ne!(a, b);
    }

    #[test]
    fn caller_supplied_key_kept_verbatim() {
        let key = ParticipantKey::from("alice-laptop");
        assert_eq!(key.as_str(), "alice-laptop");
    }

    #[test]
    fn display_and_as_ref() {
        let room = RoomId::from("r1");
        assert_eq!(format!("{room}"), "r1");
        assert_eq!(room.as_ref(), "r1");
    }

    #[test]
    fn into_inner_round_trip() {
        let conn = ConnectionId::from("c-42");
        assert_eq!(conn.into_inner(), "c-42");
    }

    #[test]
    fn serde_is_transparent() {
        let key = ParticipantKey::from("k1");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"k1\"");
        let back: ParticipantKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn usable_as_map_key() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        let _ = map.insert(ParticipantKey::from("b"), 2);
        let _ = map.insert(ParticipantKey::from("a"), 1);
        let keys: Vec<_> = map.keys().map(ParticipantKey::as_str).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    #[test]
    fn default_mints_fresh() {
        assert_ne!(RoomId::default(), RoomId::default());
    }
}
