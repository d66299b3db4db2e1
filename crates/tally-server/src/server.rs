//! `TallyServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tally_core::RoomId;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::room::registry::RoomRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Errors surfaced while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live rooms.
    pub rooms: Arc<RoomRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: ServerConfig,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// The main tally server.
pub struct TallyServer {
    config: ServerConfig,
    rooms: Arc<RoomRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl TallyServer {
    /// Create a new server.
    #[must_use]
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        Self {
            config,
            rooms: Arc::new(RoomRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            rooms: self.rooms.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/{room_id}", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve
    /// task's handle.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = serve {
                error!(error = %e, "server task failed");
            }
        });

        info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// Get the room registry.
    #[must_use]
    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Get the shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Connect-time query parameters.
#[derive(Debug, Deserialize)]
struct JoinParams {
    /// Previously-issued participant key for reconnection continuity.
    #[serde(rename = "playerId")]
    player_id: Option<String>,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.rooms.connection_count(),
        state.rooms.room_count(),
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

/// GET /ws/{room_id} — WebSocket upgrade into a room session.
async fn ws_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<JoinParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.rooms.connection_count() >= state.config.max_connections {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let config = state.config.clone();
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(
                socket,
                state.rooms.clone(),
                RoomId::from(room_id),
                params.player_id,
                config,
            )
        })
}
