//! # tally-server
//!
//! Axum HTTP + `WebSocket` server and room-state broadcasting.
//!
//! - `WebSocket` gateway: one session task per connection, heartbeat,
//!   inbound dispatch into the owning room
//! - Rooms: a per-room handle serializing join/message/leave and fanning
//!   every committed change out as a full snapshot
//! - Room registry: get-or-create by room id, teardown on last disconnect
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod room;
pub mod server;
pub mod shutdown;
pub mod websocket;
