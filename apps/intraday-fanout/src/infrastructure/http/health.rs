//! Health, readiness, and metrics handlers.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::application::services::FanoutStats;
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics::{get_metrics_handle, set_registry_size, set_upstream_state};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream connection status.
    pub upstream: UpstreamStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Idle or streaming.
    Healthy,
    /// Connecting or authenticating.
    Degraded,
    /// Started but disconnected.
    Unhealthy,
}

/// Upstream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamStatus {
    /// Whether the connection task has been started.
    pub started: bool,
    /// Connection state.
    pub state: &'static str,
    /// Reconnect attempts since start.
    pub reconnect_attempts: u64,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Symbols with at least one session.
    pub active_symbols: usize,
    /// Registered (symbol, session) pairs.
    pub registered_sessions: usize,
}

// =============================================================================
// HTTP Handlers
// =============================================================================

pub(super) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.supervisor.stats();

    if determine_health_status(&stats) == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

pub(super) async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Gauges derived from live state are refreshed at scrape time
    let stats = state.supervisor.stats();
    set_registry_size(stats.active_symbols, stats.registered_sessions);
    set_upstream_state(stats.upstream_state);

    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let stats = state.supervisor.stats();

    HealthResponse {
        status: determine_health_status(&stats),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream: UpstreamStatus {
            started: stats.upstream_started,
            state: stats.upstream_state.as_str(),
            reconnect_attempts: stats.reconnect_attempts,
        },
        subscriptions: SubscriptionStatus {
            active_symbols: stats.active_symbols,
            registered_sessions: stats.registered_sessions,
        },
    }
}

const fn determine_health_status(stats: &FanoutStats) -> HealthStatus {
    if !stats.upstream_started {
        return HealthStatus::Healthy;
    }

    match stats.upstream_state {
        ConnectionState::Streaming => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::AwaitingAuth => HealthStatus::Degraded,
        ConnectionState::Disconnected => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================
