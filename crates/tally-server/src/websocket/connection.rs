//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tally_core::{ConnectionId, ParticipantKey};

/// One live transport connection, bound to its resolved participant key
/// for its whole lifetime. Reconnecting clients get a fresh
/// `ClientConnection` that resolves to the same key.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// The participant this connection speaks for. Resolved once at
    /// connect time, never rebound.
    player_key: ParticipantKey,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last ping.
    pub is_alive: AtomicBool,
    /// When the last Pong (or any liveness signal) was received.
    last_pong: Mutex<Instant>,
    /// Count of frames dropped due to a full or closed channel.
    dropped_frames: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection bound to `player_key`.
    pub fn new(id: ConnectionId, player_key: ParticipantKey, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            player_key,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// The participant key this connection resolved to.
    #[must_use]
    pub fn player_key(&self) -> &ParticipantKey {
        &self.player_key
    }

    /// Enqueue a serialized frame for the client.
    ///
    /// Fire-and-forget: returns `false` if the channel is full or
    /// closed, incrementing the drop counter. A slow client only loses
    /// its own frames.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    #[must_use]
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last liveness signal.
    #[must_use]
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for the heartbeat tick.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(
            ConnectionId::from("conn_1"),
            ParticipantKey::from("player_1"),
            tx,
        );
        (conn, rx)
    }

    #[test]
    fn connection_carries_its_key() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.id.as_str(), "conn_1");
        assert_eq!(conn.player_key().as_str(), "player_1");
        assert!(conn.is_alive.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn send_delivers_frame() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(Arc::new("hello".into())));
        let frame = rx.recv().await.unwrap();
        assert_eq!(&*frame, "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_counts_drop() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::from("c"), ParticipantKey::from("p"), tx);
        drop(rx);
        assert!(!conn.send(Arc::new("hello".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(ConnectionId::from("c"), ParticipantKey::from("p"), tx);
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[test]
    fn mark_alive_refreshes_pong_clock() {
        let (conn, _rx) = make_connection();
        std::thread::sleep(Duration::from_millis(10));
        conn.mark_alive();
        assert!(conn.last_pong_elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (conn, mut rx) = make_connection();
        for i in 0..5 {
            assert!(conn.send(Arc::new(format!("frame_{i}"))));
        }
        for i in 0..5 {
            assert_eq!(&*rx.recv().await.unwrap(), &format!("frame_{i}"));
        }
    }
}
