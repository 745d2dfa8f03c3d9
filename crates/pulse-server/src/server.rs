//! `PulseServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use pulse_core::ConnectionError;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ConnectionConfig;
use crate::websocket::frame::Frame;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session;

/// Payload delivered by `GET /send`.
const TARGETED_GREETING: &str = "hello, client";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connection set.
    pub registry: ConnectionRegistry,
    /// Limits and timing handed to each new connection.
    pub connection: ConnectionConfig,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
}

/// The Pulse hub server.
pub struct PulseServer {
    config: ServerConfig,
    registry: ConnectionRegistry,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl PulseServer {
    /// Create a server and start its connection registry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let (registry, _task) = ConnectionRegistry::spawn();
        Self {
            config,
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            connection: self.config.connection_config(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/ping", get(ping_handler))
            .route("/send", get(send_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown is requested.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server terminated with error");
            }
        });

        info!(%addr, "pulse server listening");
        Ok((addr, handle))
    }

    /// Stop accepting, close live connections, and wait for `server_task`.
    pub async fn stop(&self, server_task: JoinHandle<()>) {
        self.shutdown
            .graceful_shutdown(&self.registry, vec![server_task], None)
            .await;
        info!("pulse server stopped");
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WsParams {
    username: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendParams {
    client: String,
}

/// GET /ws?username=<identity>
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let err = ConnectionError::Upgrade(rejection.to_string());
            warn!(identity = %params.username, error = %err, "websocket upgrade rejected");
            return rejection.into_response();
        }
    };

    let identity = params.username;
    let registry = state.registry;
    let config = state.connection;
    upgrade
        .read_buffer_size(config.buffer_size)
        .write_buffer_size(config.buffer_size)
        .max_message_size(config.max_message_size)
        .max_frame_size(config.max_message_size)
        .on_failed_upgrade(|e: axum::Error| {
            let err = ConnectionError::Upgrade(e.to_string());
            warn!(error = %err, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| session::run_ws_session(socket, identity, registry, config))
}

/// GET /ping: broadcast the current time to every live connection.
async fn ping_handler(State(state): State<AppState>) -> Response {
    let payload = format!(
        "hello, time: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    match state.registry.broadcast(Frame::text(payload)) {
        Ok(()) => Json(json!({ "message": "ok" })).into_response(),
        Err(e) => registry_unavailable(&e),
    }
}

/// GET /send?client=<identity>: greet every connection owned by `client`.
async fn send_handler(
    State(state): State<AppState>,
    Query(params): Query<SendParams>,
) -> Response {
    match state
        .registry
        .send_to_identity(&params.client, Frame::text(TARGETED_GREETING))
        .await
    {
        Ok(report) if report.attempted == 0 => {
            Json(json!({ "message": "no client" })).into_response()
        }
        Ok(report) => {
            info!(
                identity = %params.client,
                delivered = report.delivered,
                removed = report.removed,
                "targeted send"
            );
            Json(json!({ "message": "ok" })).into_response()
        }
        Err(e) => registry_unavailable(&e),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.registry.connection_count().await {
        Ok(connections) => {
            let resp: HealthResponse = health::health_check(state.start_time, connections);
            Json(resp).into_response()
        }
        Err(e) => registry_unavailable(&e),
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    metrics::render(&state.metrics)
}

fn registry_unavailable(e: &pulse_core::RegistryError) -> Response {
    error!(error = %e, "connection registry unavailable");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "message": e.to_string() })),
    )
        .into_response()
}
