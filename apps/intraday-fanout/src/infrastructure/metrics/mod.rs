//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Frames received, reconnects, auth rejections, commands sent
//! - **Fanout**: Bars delivered, sessions evicted, dispatch latency
//! - **Registry**: Active symbol and session gauges
//! - **Drops**: Malformed or unroutable upstream messages by reason
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call more than once; later calls return the same handle. If a
/// different global recorder is already installed, the returned handle
/// renders an empty registry.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();

            if let Err(e) = metrics::set_global_recorder(recorder) {
                tracing::warn!(error = %e, "Metrics recorder already installed");
            }

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "intraday_fanout_frames_received_total",
        "Total text frames received from the upstream feed"
    );
    describe_counter!(
        "intraday_fanout_messages_dropped_total",
        "Total upstream messages dropped, by reason"
    );
    describe_counter!(
        "intraday_fanout_bars_delivered_total",
        "Total bar frames delivered to chart sessions"
    );
    describe_counter!(
        "intraday_fanout_sessions_evicted_total",
        "Total chart sessions evicted after a failed delivery"
    );

    describe_counter!(
        "intraday_fanout_upstream_reconnects_total",
        "Total upstream reconnection attempts"
    );
    describe_counter!(
        "intraday_fanout_upstream_auth_rejected_total",
        "Total upstream authentication rejections"
    );
    describe_counter!(
        "intraday_fanout_upstream_commands_total",
        "Total control commands sent upstream, by action"
    );

    describe_gauge!(
        "intraday_fanout_active_symbols",
        "Number of symbols with at least one chart session"
    );
    describe_gauge!(
        "intraday_fanout_registered_sessions",
        "Number of (symbol, session) registrations"
    );
    describe_gauge!(
        "intraday_fanout_upstream_state",
        "Upstream state: 0=disconnected 1=connecting 2=awaiting_auth 3=streaming"
    );

    describe_histogram!(
        "intraday_fanout_dispatch_seconds",
        "Time to deliver one bar to every subscriber"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons an upstream message is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame was not valid JSON.
    InvalidJson,
    /// Frame or element had the wrong JSON shape.
    InvalidFormat,
    /// Aggregate message missing a required field.
    MalformedBar,
    /// Bar arrived for a symbol nobody watches.
    NoSubscribers,
}

impl DropReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidFormat => "invalid_format",
            Self::MalformedBar => "malformed_bar",
            Self::NoSubscribers => "no_subscribers",
        }
    }
}

/// Record a text frame received upstream.
pub fn record_frame_received() {
    counter!("intraday_fanout_frames_received_total").increment(1);
}

/// Record a dropped upstream message.
pub fn record_message_dropped(reason: DropReason) {
    counter!(
        "intraday_fanout_messages_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record successful bar deliveries.
pub fn record_bars_delivered(count: u64) {
    counter!("intraday_fanout_bars_delivered_total").increment(count);
}

/// Record evicted sessions.
pub fn record_sessions_evicted(count: u64) {
    counter!("intraday_fanout_sessions_evicted_total").increment(count);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("intraday_fanout_upstream_reconnects_total").increment(1);
}

/// Record an upstream auth rejection.
pub fn record_auth_rejected() {
    counter!("intraday_fanout_upstream_auth_rejected_total").increment(1);
}

/// Record a control command sent upstream.
pub fn record_upstream_command(action: &'static str) {
    counter!(
        "intraday_fanout_upstream_commands_total",
        "action" => action
    )
    .increment(1);
}

/// Update registry gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_registry_size(symbols: usize, sessions: usize) {
    gauge!("intraday_fanout_active_symbols").set(symbols as f64);
    gauge!("intraday_fanout_registered_sessions").set(sessions as f64);
}

/// Update the upstream state gauge.
pub fn set_upstream_state(state: ConnectionState) {
    gauge!("intraday_fanout_upstream_state").set(state_value(state));
}

/// Record the duration of one dispatch pass.
pub fn record_dispatch_duration(duration: Duration) {
    histogram!("intraday_fanout_dispatch_seconds").record(duration.as_secs_f64());
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::AwaitingAuth => 2.0,
        ConnectionState::Streaming => 3.0,
    }
}

// =============================================================================
// Tests
// =============================================================================
