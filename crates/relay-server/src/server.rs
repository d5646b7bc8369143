//! `RelayServer`: Axum HTTP server for the stream relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_broker::{Broker, ChannelBinder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::registry::StreamRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::stream::handler::stream_handler;

/// Route of the SSE endpoint.
pub const STREAM_ROUTE: &str = "/api/v1.0/a1/stream/{session_id}";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Opens and releases per-stream subscriptions.
    pub binder: ChannelBinder,
    /// Live streams.
    pub registry: Arc<StreamRegistry>,
    /// Shutdown coordinator; stream tasks run on its tracker.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    binder: ChannelBinder,
    registry: Arc<StreamRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Create a server relaying from `broker`.
    pub fn new(config: ServerConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            config: Arc::new(config),
            binder: ChannelBinder::new(broker),
            registry: Arc::new(StreamRegistry::new()),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            binder: self.binder.clone(),
            registry: self.registry.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(STREAM_ROUTE, get(stream_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "relay server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the stream registry.
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let reachable =
        health::probe_broker(state.binder.broker().as_ref(), state.config.health_timeout).await;
    let resp = health::health_check(
        state.start_time,
        reachable,
        state.registry.count().await,
        state.registry.session_count().await,
    );
    let status = if resp.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(resp))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
