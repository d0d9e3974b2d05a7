//! HTTP Server
//!
//! One axum listener serves the browser-facing chart socket alongside the
//! operational endpoints.
//!
//! # Endpoints
//!
//! - `GET /ws/chart/intraday/{symbol}` - Live bar stream for one symbol
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks upstream)
//! - `GET /metrics` - Prometheus metrics in text format

mod chart;
mod health;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use chart::WsClientSession;
pub use health::{HealthResponse, HealthStatus, SubscriptionStatus, UpstreamStatus};

use crate::application::services::FanoutSupervisor;

// =============================================================================
// Server State
// =============================================================================

/// Shared state for all HTTP handlers.
pub struct AppState {
    version: String,
    started_at: Instant,
    supervisor: Arc<FanoutSupervisor>,
    session_queue_capacity: usize,
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        supervisor: Arc<FanoutSupervisor>,
        session_queue_capacity: usize,
    ) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            supervisor,
            session_queue_capacity: session_queue_capacity.max(1),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/chart/intraday/{symbol}", get(chart::chart_ws_handler))
        .route("/health", get(health::health_handler))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP server for chart sockets and health checks.
pub struct HttpServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "HTTP server listening");
        }

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
