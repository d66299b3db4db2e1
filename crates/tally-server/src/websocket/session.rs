//! WebSocket session lifecycle — handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use tally_core::{ConnectionId, ParticipantKey, RoomId, ServerMessage};

use crate::config::ServerConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::room::registry::RoomRegistry;
use crate::websocket::connection::ClientConnection;

/// Resolve the connect-time participant key.
///
/// A non-empty caller-supplied key is reused verbatim (reconnection
/// continuity); anything else mints a fresh one.
pub(crate) fn resolve_player_key(supplied: Option<String>) -> ParticipantKey {
    supplied
        .filter(|k| !k.is_empty())
        .map_or_else(ParticipantKey::new, ParticipantKey::from)
}

/// Build the one-shot hello telling the client which key it resolved to.
pub(crate) fn welcome_frame(player_key: &ParticipantKey) -> ServerMessage {
    ServerMessage::Welcome {
        player_id: player_key.clone(),
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    }
}

/// Run a WebSocket session for a connected client.
///
/// 1. Resolves the participant key and sends a `welcome` frame
/// 2. Joins the room (which broadcasts the updated state)
/// 3. Feeds inbound text frames into the room's dispatcher
/// 4. Pumps outbound frames and periodic Pings; disconnects
///    unresponsive clients
/// 5. Leaves the room on disconnect
#[instrument(skip_all, fields(room = %room_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    registry: Arc<RoomRegistry>,
    room_id: RoomId,
    supplied_key: Option<String>,
    config: ServerConfig,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let player_key = resolve_player_key(supplied_key);
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(256);
    let connection = Arc::new(ClientConnection::new(
        ConnectionId::new(),
        player_key.clone(),
        send_tx,
    ));

    info!(conn = %connection.id, player = %player_key, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // Spawn the outbound forwarder with periodic Ping frames.
    let ping_interval = Duration::from_secs(config.heartbeat_interval_secs.max(1));
    let pong_timeout = Duration::from_secs(config.heartbeat_timeout_secs);
    let outbound_conn = connection.clone();
    let outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick.
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > pong_timeout
                    {
                        warn!("client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The welcome goes through the same queue as the broadcasts, so it
    // always precedes this connection's first state frame.
    match serde_json::to_string(&welcome_frame(&player_key)) {
        Ok(json) => {
            let _ = connection.send(Arc::new(json));
        }
        Err(e) => warn!(error = %e, "failed to serialize welcome frame"),
    }

    let room = registry.join(&room_id, connection.clone()).await;

    // Process incoming frames until the client goes away.
    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => {
                // Some clients send text payloads as binary frames.
                if let Ok(s) = std::str::from_utf8(data) {
                    Some(s.to_owned())
                } else {
                    info!(conn = %connection.id, len = data.len(), "ignoring non-UTF8 binary frame");
                    None
                }
            }
            Message::Close(_) => {
                info!(conn = %connection.id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };

        let Some(text) = text else { continue };
        room.on_message(&connection, &text).await;
    }

    info!(conn = %connection.id, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    outbound.abort();
    registry.leave(&room, &connection).await;
}
