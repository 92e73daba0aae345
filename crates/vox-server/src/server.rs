//! `RelayServer` — Axum HTTP + WebSocket server hosting the relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use vox_core::SessionId;
use vox_upstream::{BridgeConfig, UpstreamConnector};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::session::run_voice_session;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers and session tasks.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Per-session bridge parameters (voice, instructions, timeouts).
    pub bridge_config: BridgeConfig,
    /// Upstream credential, shared read-only across all sessions.
    pub credential: Option<Arc<str>>,
    /// Upstream connector (production or mock).
    pub connector: Arc<dyn UpstreamConnector>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Live session count.
    pub active: Arc<AtomicUsize>,
    /// Prometheus render handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a new server.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        bridge_config: BridgeConfig,
        credential: Option<Arc<str>>,
        connector: Arc<dyn UpstreamConnector>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            state: AppState {
                config,
                bridge_config,
                credential,
                connector,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                active: Arc::new(AtomicUsize::new(0)),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/realtime-voice", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve. Returns the bound address and the serve task handle.
    ///
    /// With `port: 0` the OS assigns a free port, reported in the returned
    /// address. The serve task stops when the shutdown coordinator fires.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
                .ok();
        });

        info!(addr = %local_addr, "relay server listening");
        Ok((local_addr, handle))
    }

    /// Get the shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Live session count.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }
}

/// Holds one slot of session capacity; released on drop.
pub(crate) struct SessionGuard {
    active: Arc<AtomicUsize>,
}

impl SessionGuard {
    /// Try to take a capacity slot. `None` when the server is full.
    fn try_acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let prev = active.fetch_add(1, Ordering::SeqCst);
        if prev >= limit {
            let _ = active.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// GET /realtime-voice — WebSocket upgrade into a relay session.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let Some(guard) = SessionGuard::try_acquire(&state.active, state.config.max_connections)
    else {
        warn!(
            limit = state.config.max_connections,
            "session capacity reached, rejecting upgrade"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let session_id = SessionId::new();
    let max_message_size = state.config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            let _guard = guard;
            run_voice_session(socket, session_id, state).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let active = state.active.load(Ordering::SeqCst);
    Json(health::health_check(
        state.start_time,
        active,
        state.config.max_connections,
    ))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
