//! Host-level room registry.
//!
//! Rooms come into existence on first connect and vanish when their
//! last connection closes — soft state, nothing persisted. The map is
//! sharded (`DashMap`) so unrelated rooms never contend; all per-room
//! ordering lives behind each [`RoomHandle`]'s own lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use metrics::gauge;
use tracing::debug;

use tally_core::RoomId;

use crate::metrics::ROOMS_ACTIVE;
use crate::room::handle::RoomHandle;
use crate::websocket::connection::ClientConnection;

/// Registry of live rooms, keyed by room id.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<RoomHandle>>,
    connections: AtomicUsize,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            connections: AtomicUsize::new(0),
        }
    }

    /// Join `conn` to the room with this id, creating the room on first
    /// connect. Returns the handle the connection is now part of.
    ///
    /// A join can race the teardown of a room's previous incarnation;
    /// the tombstoned handle rejects it and the loop retries against a
    /// fresh one.
    pub async fn join(&self, room_id: &RoomId, conn: Arc<ClientConnection>) -> Arc<RoomHandle> {
        loop {
            let handle = self
                .rooms
                .entry(room_id.clone())
                .or_insert_with(|| {
                    debug!(room = %room_id, "room created");
                    gauge!(ROOMS_ACTIVE).increment(1.0);
                    Arc::new(RoomHandle::new(room_id.clone()))
                })
                .clone();

            if handle.on_join(conn.clone()).await.is_ok() {
                let _ = self.connections.fetch_add(1, Ordering::Relaxed);
                return handle;
            }

            // Lost the race against teardown; evict exactly that
            // incarnation and retry.
            let _ = self
                .rooms
                .remove_if(room_id, |_, h| Arc::ptr_eq(h, &handle));
        }
    }

    /// Detach a closing connection from its room, tearing the room down
    /// if it was the last one.
    pub async fn leave(&self, handle: &Arc<RoomHandle>, conn: &ClientConnection) {
        let emptied = handle.on_leave(conn).await;
        let _ = self.connections.fetch_sub(1, Ordering::Relaxed);
        if emptied {
            let _ = self
                .rooms
                .remove_if(handle.id(), |_, h| Arc::ptr_eq(h, handle));
            gauge!(ROOMS_ACTIVE).decrement(1.0);
            debug!(room = %handle.id(), "room destroyed");
        }
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of live connections across all rooms.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("room_count", &self.rooms.len())
            .finish()
    }
}
