//! Per-room serialization context.
//!
//! A [`RoomHandle`] owns everything about one room — the authoritative
//! [`RoomState`], the table of live connections, and the broadcast
//! fan-out — behind a single `tokio::sync::Mutex`. Each of the three
//! entry points (`on_join`, `on_message`, `on_leave`) holds the lock
//! across validate-apply-broadcast, which is what gives a room its
//! one-writer ordering guarantee. Different rooms never share data.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tally_core::{
    Applied, ClientMessage, ConnectionId, IgnoreReason, RoomId, RoomSnapshot, RoomState,
    ServerMessage,
};

use crate::metrics::{MESSAGES_IGNORED_TOTAL, STATE_BROADCASTS_TOTAL, WS_BROADCAST_DROPS_TOTAL};
use crate::websocket::connection::ClientConnection;

/// Join attempted against a room torn down by its last disconnect.
/// The registry retries against a fresh incarnation.
#[derive(Debug, thiserror::Error)]
#[error("room is closed")]
pub struct RoomClosed;

struct RoomInner {
    state: RoomState,
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    /// Tombstone set when the last connection leaves; a closed handle
    /// never accepts another join.
    closed: bool,
}

/// Handle to one live room.
pub struct RoomHandle {
    id: RoomId,
    inner: Mutex<RoomInner>,
}

impl RoomHandle {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            inner: Mutex::new(RoomInner {
                state: RoomState::new(),
                connections: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// The room's id.
    #[must_use]
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Register a connection and admit its participant key.
    ///
    /// Broadcasts the updated state to every connection, the new one
    /// included.
    pub async fn on_join(&self, conn: Arc<ClientConnection>) -> Result<(), RoomClosed> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(RoomClosed);
        }
        inner.state.admit(conn.player_key());
        debug!(room = %self.id, conn = %conn.id, player = %conn.player_key(), "connection joined");
        let _ = inner.connections.insert(conn.id.clone(), conn);
        inner.broadcast_state(&self.id);
        Ok(())
    }

    /// Dispatch one inbound text frame from `sender`.
    ///
    /// Accepted mutations broadcast a full snapshot; the ephemeral kind
    /// broadcasts its relay only; everything else is dropped with a
    /// diagnostic and never answered.
    pub async fn on_message(&self, sender: &ClientConnection, text: &str) {
        let mut inner = self.inner.lock().await;

        let msg = match ClientMessage::parse(text) {
            Ok(msg) => msg,
            Err(reason) => {
                warn!(room = %self.id, player = %sender.player_key(), %reason, "dropping message");
                counter!(MESSAGES_IGNORED_TOTAL, "reason" => reason_label(&reason)).increment(1);
                return;
            }
        };

        match inner.state.apply(sender.player_key(), msg) {
            Ok(Applied::Mutated) => inner.broadcast_state(&self.id),
            Ok(Applied::Ephemeral(throw)) => {
                let relay = ServerMessage::ThrowEmoji {
                    sender_id: throw.sender_id,
                    target_id: throw.target_id,
                    emoji: throw.emoji,
                };
                inner.broadcast(&self.id, &relay);
            }
            Err(reason) => {
                debug!(room = %self.id, player = %sender.player_key(), %reason, "dropping message");
                counter!(MESSAGES_IGNORED_TOTAL, "reason" => reason_label(&reason)).increment(1);
            }
        }
    }

    /// Unregister a closing connection.
    ///
    /// Removes the participant when this was the key's last live
    /// connection, then broadcasts to the remainder. Returns `true`
    /// when the room emptied and was tombstoned — the caller drops it
    /// from the registry.
    pub async fn on_leave(&self, conn: &ClientConnection) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.connections.remove(&conn.id).is_none() {
            return false;
        }

        let key_still_live = inner
            .connections
            .values()
            .any(|c| c.player_key() == conn.player_key());
        if !key_still_live {
            inner.state.remove(conn.player_key());
        }
        debug!(room = %self.id, conn = %conn.id, player = %conn.player_key(), "connection left");

        if inner.connections.is_empty() {
            inner.closed = true;
            true
        } else {
            inner.broadcast_state(&self.id);
            false
        }
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    /// Current state snapshot.
    pub async fn snapshot(&self) -> RoomSnapshot {
        self.inner.lock().await.state.snapshot()
    }
}

impl RoomInner {
    fn broadcast_state(&self, room: &RoomId) {
        let msg = ServerMessage::State {
            state: self.state.snapshot(),
        };
        self.broadcast(room, &msg);
        counter!(STATE_BROADCASTS_TOTAL).increment(1);
    }

    /// Serialize once, enqueue to every connection. A failed enqueue is
    /// isolated to its connection and never aborts the fan-out.
    fn broadcast(&self, room: &RoomId, msg: &ServerMessage) {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!(room = %room, error = %e, "failed to serialize outbound frame");
                return;
            }
        };
        let frame = Arc::new(json);
        for conn in self.connections.values() {
            if !conn.send(frame.clone()) {
                warn!(room = %room, conn = %conn.id, "failed to enqueue frame for client");
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            }
        }
    }
}

impl std::fmt::Debug for RoomHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomHandle").field("id", &self.id).finish()
    }
}

fn reason_label(reason: &IgnoreReason) -> &'static str {
    match reason {
        IgnoreReason::Malformed => "malformed",
        IgnoreReason::UnknownKind(_) => "unknown_kind",
        IgnoreReason::InvalidField { .. } => "invalid_field",
        IgnoreReason::UnknownSender(_) => "unknown_sender",
        IgnoreReason::UnknownTarget(_) => "unknown_target",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tally_core::ParticipantKey;
    use tokio::sync::mpsc;

    fn make_connection(
        conn_id: &str,
        player: &str,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(
            ConnectionId::from(conn_id),
            ParticipantKey::from(player),
            tx,
        );
        (Arc::new(conn), rx)
    }

    fn parse(frame: &Arc<String>) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    async fn recv(rx: &mut mpsc::Receiver<Arc<String>>) -> Value {
        parse(&rx.recv().await.unwrap())
    }

    #[tokio::test]
    async fn first_join_broadcasts_initial_state() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (conn, mut rx) = make_connection("c1", "a");
        room.on_join(conn).await.unwrap();

        let frame = recv(&mut rx).await;
        assert_eq!(frame["type"], "state");
        assert_eq!(frame["state"]["adminId"], "a");
        assert_eq!(frame["state"]["players"]["a"]["name"], "Player 1");
        assert!(frame["state"]["players"]["a"]["vote"].is_null());
        assert_eq!(frame["state"]["revealed"], false);
    }

    #[tokio::test]
    async fn join_broadcasts_reach_existing_connections() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        let (c2, mut rx2) = make_connection("c2", "b");
        room.on_join(c1).await.unwrap();
        let _ = recv(&mut rx1).await;

        room.on_join(c2).await.unwrap();
        let seen_by_a = recv(&mut rx1).await;
        let seen_by_b = recv(&mut rx2).await;
        assert_eq!(seen_by_a, seen_by_b);
        assert_eq!(seen_by_a["state"]["players"]["b"]["name"], "Player 2");
    }

    #[tokio::test]
    async fn vote_broadcasts_to_everyone_including_sender() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        let (c2, mut rx2) = make_connection("c2", "b");
        room.on_join(c1.clone()).await.unwrap();
        room.on_join(c2).await.unwrap();
        let _ = recv(&mut rx1).await;
        let _ = recv(&mut rx1).await;
        let _ = recv(&mut rx2).await;

        room.on_message(&c1, r#"{"type":"vote","vote":"5"}"#).await;
        let seen_by_sender = recv(&mut rx1).await;
        let seen_by_other = recv(&mut rx2).await;
        assert_eq!(seen_by_sender["state"]["players"]["a"]["vote"], "5");
        assert_eq!(seen_by_sender, seen_by_other);
    }

    #[tokio::test]
    async fn unknown_kind_produces_no_broadcast() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        room.on_join(c1.clone()).await.unwrap();
        let _ = recv(&mut rx1).await;

        room.on_message(&c1, r#"{"type":"dance"}"#).await;
        // The next frame a client sees is from the next accepted
        // message, proving nothing was emitted in between.
        room.on_message(&c1, r#"{"type":"reveal"}"#).await;
        let frame = recv(&mut rx1).await;
        assert_eq!(frame["state"]["revealed"], true);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_body_produces_no_broadcast() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        room.on_join(c1.clone()).await.unwrap();
        let _ = recv(&mut rx1).await;

        room.on_message(&c1, "not json").await;
        room.on_message(&c1, r#"{"type":"vote","vote":7}"#).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn emoji_relay_is_broadcast_without_state_change() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        let (c2, mut rx2) = make_connection("c2", "b");
        room.on_join(c1.clone()).await.unwrap();
        room.on_join(c2).await.unwrap();
        let _ = recv(&mut rx1).await;
        let _ = recv(&mut rx1).await;
        let _ = recv(&mut rx2).await;

        room.on_message(&c1, r#"{"type":"throwEmoji","targetId":"b","emoji":"🍕"}"#)
            .await;
        let seen_by_a = recv(&mut rx1).await;
        let seen_by_b = recv(&mut rx2).await;
        assert_eq!(seen_by_a["type"], "throwEmoji");
        assert_eq!(seen_by_a["senderId"], "a");
        assert_eq!(seen_by_a["targetId"], "b");
        assert_eq!(seen_by_a["emoji"], "🍕");
        assert_eq!(seen_by_a, seen_by_b);
        // No trailing state broadcast.
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn emoji_at_unknown_target_produces_no_broadcast() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        room.on_join(c1.clone()).await.unwrap();
        let _ = recv(&mut rx1).await;

        room.on_message(&c1, r#"{"type":"throwEmoji","targetId":"ghost","emoji":"🍕"}"#)
            .await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_removes_player_and_notifies_remainder() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, _rx1) = make_connection("c1", "a");
        let (c2, mut rx2) = make_connection("c2", "b");
        room.on_join(c1.clone()).await.unwrap();
        room.on_join(c2).await.unwrap();
        let _ = recv(&mut rx2).await;

        let emptied = room.on_leave(&c1).await;
        assert!(!emptied);
        let frame = recv(&mut rx2).await;
        assert!(frame["state"]["players"].get("a").is_none());
        // Admin slot survives the admin's departure.
        assert_eq!(frame["state"]["adminId"], "a");
    }

    #[tokio::test]
    async fn shared_key_participant_survives_one_connection_closing() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, _rx1) = make_connection("c1", "a");
        let (c2, _rx2) = make_connection("c2", "a");
        let (c3, mut rx3) = make_connection("c3", "b");
        room.on_join(c1.clone()).await.unwrap();
        room.on_join(c2).await.unwrap();
        room.on_join(c3).await.unwrap();
        let _ = recv(&mut rx3).await;

        let _ = room.on_leave(&c1).await;
        let frame = recv(&mut rx3).await;
        assert_eq!(frame["state"]["players"]["a"]["name"], "Player 1");
    }

    #[tokio::test]
    async fn last_leave_tombstones_the_room() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, _rx1) = make_connection("c1", "a");
        room.on_join(c1.clone()).await.unwrap();

        assert!(room.on_leave(&c1).await);
        let (c2, _rx2) = make_connection("c2", "b");
        assert!(room.on_join(c2).await.is_err());
    }

    #[tokio::test]
    async fn broadcasts_arrive_in_acceptance_order() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        room.on_join(c1.clone()).await.unwrap();
        let _ = recv(&mut rx1).await;

        for vote in ["1", "2", "3"] {
            room.on_message(&c1, &format!(r#"{{"type":"vote","vote":"{vote}"}}"#))
                .await;
        }
        for vote in ["1", "2", "3"] {
            let frame = recv(&mut rx1).await;
            assert_eq!(frame["state"]["players"]["a"]["vote"], vote);
        }
    }

    #[tokio::test]
    async fn slow_consumer_only_drops_its_own_frames() {
        let room = RoomHandle::new(RoomId::from("r1"));
        // Capacity-1 queue that is never drained.
        let (tx, _slow_rx) = mpsc::channel(1);
        let slow = Arc::new(ClientConnection::new(
            ConnectionId::from("slow"),
            ParticipantKey::from("a"),
            tx,
        ));
        let (fast, mut fast_rx) = make_connection("fast", "b");
        room.on_join(slow.clone()).await.unwrap();
        room.on_join(fast).await.unwrap();
        let _ = recv(&mut fast_rx).await;

        // The slow queue is already full from its join broadcast.
        room.on_message(&slow, r#"{"type":"vote","vote":"5"}"#).await;
        room.on_message(&slow, r#"{"type":"reveal"}"#).await;

        let frame = recv(&mut fast_rx).await;
        assert_eq!(frame["state"]["players"]["a"]["vote"], "5");
        let frame = recv(&mut fast_rx).await;
        assert_eq!(frame["state"]["revealed"], true);
        assert!(slow.drop_count() >= 2);
    }

    #[tokio::test]
    async fn reconnect_with_same_key_restores_identity() {
        let room = RoomHandle::new(RoomId::from("r1"));
        let (c1, mut rx1) = make_connection("c1", "a");
        let (keeper, _keeper_rx) = make_connection("c2", "b");
        room.on_join(c1.clone()).await.unwrap();
        room.on_join(keeper).await.unwrap();
        room.on_message(&c1, r#"{"type":"setUsername","username":"Alice"}"#)
            .await;
        room.on_message(&c1, r#"{"type":"vote","vote":"5"}"#).await;
        let _ = room.on_leave(&c1).await;
        drop(rx1);

        let (c3, mut rx3) = make_connection("c3", "a");
        room.on_join(c3).await.unwrap();
        let frame = recv(&mut rx3).await;
        assert_eq!(frame["state"]["players"]["a"]["name"], "Alice");
        assert_eq!(frame["state"]["players"]["a"]["vote"], "5");
        assert_eq!(frame["state"]["adminId"], "a");
    }
}
