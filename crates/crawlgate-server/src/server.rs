//! `GatewayServer` — axum HTTP + WebSocket front door.
//!
//! Routes: `GET /job` (WebSocket upgrade, one session per accepted
//! connection), `GET /health`, `GET /metrics`. `serve()` binds the
//! listener and spawns the process-wide singletons: exactly one
//! result dispatcher and one idle sweep, regardless of connection
//! count.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use crawlgate_broker::Broker;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::GatewayConfig;
use crate::dispatcher::run_dispatcher;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::sweep::run_idle_sweep;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live session registry, shared with the dispatcher and sweep.
    pub registry: Arc<ConnectionRegistry>,
    /// Broker handle shared by all sessions.
    pub broker: Arc<dyn Broker>,
    /// Gateway configuration.
    pub config: Arc<GatewayConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Metrics handle, when the recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The client-facing gateway server.
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<dyn Broker>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl GatewayServer {
    /// Create a server around an injected registry-free state: the
    /// registry is owned here and handed to every component that
    /// needs it.
    pub fn new(config: GatewayConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            broker,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Attach an installed Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The gateway configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            broker: Arc::clone(&self.broker),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/job", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the listener, start the dispatcher and sweep singletons,
    /// and serve until shutdown.
    pub async fn serve(self) -> Result<ServerHandle, std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        // Exactly one dispatcher per process. Starting one per
        // connection would double-consume the results topic.
        let dispatcher = tokio::spawn(run_dispatcher(
            Arc::clone(&self.broker),
            Arc::clone(&self.registry),
            self.config.poll_interval(),
            self.shutdown.token(),
        ));

        let sweep = tokio::spawn(run_idle_sweep(
            Arc::clone(&self.registry),
            self.config.idle_timeout(),
            self.config.sweep_interval(),
            self.shutdown.token(),
        ));

        let router = self.router();
        let serve_token = self.shutdown.token();
        let server = tokio::spawn(async move {
            let shutdown = async move { serve_token.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "server loop failed");
            }
        });

        info!(addr = %local_addr, "gateway listening");
        Ok(ServerHandle {
            addr: local_addr,
            shutdown: Arc::clone(&self.shutdown),
            tasks: vec![dispatcher, sweep, server],
        })
    }
}

/// Handle returned by [`GatewayServer::serve`] — owns the background
/// tasks and the shutdown signal.
pub struct ServerHandle {
    /// The bound address (useful with port 0).
    pub addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// WebSocket URL for the job endpoint.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/job", self.addr)
    }

    /// Base HTTP URL.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Signal shutdown and drain all gateway tasks.
    pub async fn stop(self) {
        self.shutdown.drain(self.tasks, None).await;
    }
}

/// GET /job — upgrade to a duplex message connection.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let ws = ws.max_message_size(state.config.max_message_size);
    ws.on_upgrade(move |socket| {
        run_ws_session(socket, state.registry, state.broker, state.config)
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics {
        Some(handle) => (StatusCode::OK, crate::metrics::render(&handle)).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
