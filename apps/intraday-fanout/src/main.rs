//! Intraday Fanout Binary
//!
//! Starts the live bar fanout service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin intraday-fanout
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MASSIVE_API_KEY`: Massive API key
//!
//! ## Optional
//! - `MASSIVE_WS_URL`: Upstream socket (default: `wss://socket.massive.com/stocks`)
//! - `FANOUT_HTTP_PORT`: Chart WebSocket and health port (default: 8000)
//! - `FANOUT_AUTH_TIMEOUT_SECS`: Auth handshake bound (default: 5)
//! - `FANOUT_RECONNECT_DELAYS_MS`: Backoff schedule (default: 500,1500,3000)
//! - `FANOUT_RECONNECT_JITTER`: Backoff jitter fraction (default: 0)
//! - `FANOUT_HEARTBEAT_INTERVAL_SECS`: Ping interval, 0 disables (default: 20)
//! - `FANOUT_HEARTBEAT_TIMEOUT_SECS`: Pong deadline (default: 20)
//! - `FANOUT_DELIVERY_TIMEOUT_MS`: Per-session send bound (default: 1000)
//! - `FANOUT_SESSION_QUEUE_CAPACITY`: Per-session queue (default: 256)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: dipdetector-intraday-fanout)
//! - `RUST_LOG`: Log filter (default: `intraday_fanout=info`)

use std::sync::Arc;

use anyhow::Context;
use intraday_fanout::infrastructure::telemetry;
use intraday_fanout::{
    AppState, FanoutConfig, HttpServer, TungsteniteConnector, build_fanout, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Intraday Fanout");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = FanoutConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let supervisor = build_fanout(&config, Arc::new(TungsteniteConnector::new()));

    let state = Arc::new(AppState::new(
        env!("CARGO_PKG_VERSION"),
        Arc::clone(&supervisor),
        config.sessions.queue_capacity,
    ));
    let server = HttpServer::new(config.server.http_port, state, shutdown_token.clone());

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Intraday fanout ready");

    await_shutdown(shutdown_token).await;

    supervisor.shutdown();
    let _ = server_handle.await;

    tracing::info!("Intraday fanout stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &FanoutConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        upstream_url = %config.massive.url,
        session_queue_capacity = config.sessions.queue_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        auth_timeout_secs = config.massive.auth_timeout.as_secs(),
        heartbeat_interval_secs = config.massive.heartbeat_interval.as_secs(),
        heartbeat_timeout_secs = config.massive.heartbeat_timeout.as_secs(),
        reconnect_delays = ?config.massive.reconnect_delays,
        delivery_timeout_ms = u64::try_from(config.sessions.delivery_timeout.as_millis()).unwrap_or(u64::MAX),
        "Upstream timing"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
