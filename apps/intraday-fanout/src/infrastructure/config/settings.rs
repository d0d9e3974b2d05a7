//! Fanout Configuration Settings
//!
//! Configuration types for the fanout service, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::DEFAULT_DELIVERY_TIMEOUT;
use crate::infrastructure::massive::{
    AUTH_TIMEOUT, ApiKey, DEFAULT_DELAYS, HeartbeatConfig, ReconnectConfig, UpstreamSettings,
};

/// Default Massive stocks socket.
pub const DEFAULT_MASSIVE_WS_URL: &str = "wss://socket.massive.com/stocks";

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct MassiveSettings {
    /// WebSocket URL.
    pub url: String,
    /// API key (redacted in `Debug`).
    pub api_key: ApiKey,
    /// Bound on the auth handshake.
    pub auth_timeout: Duration,
    /// Backoff schedule.
    pub reconnect_delays: Vec<Duration>,
    /// Backoff jitter as a fraction of each delay.
    pub reconnect_jitter: f64,
    /// Ping interval; zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// Silence allowed after a ping.
    pub heartbeat_timeout: Duration,
}

/// Downstream chart session settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bound on a single delivery to one session.
    pub delivery_timeout: Duration,
    /// Outbound frames buffered per session before it counts as slow.
    pub queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            queue_capacity: 256,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port for the chart WebSocket, health, and metrics routes.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8000 }
    }
}

/// Complete fanout configuration.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Upstream settings.
    pub massive: MassiveSettings,
    /// Per-session settings.
    pub sessions: SessionSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl FanoutConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `MASSIVE_API_KEY` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if `MASSIVE_API_KEY` is missing or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_key = lookup("MASSIVE_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("MASSIVE_API_KEY".to_string()))?;
        let api_key =
            ApiKey::new(raw_key).map_err(|_| ConfigError::EmptyValue("MASSIVE_API_KEY".to_string()))?;

        let heartbeat = HeartbeatConfig::default();
        let massive = MassiveSettings {
            url: lookup("MASSIVE_WS_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MASSIVE_WS_URL.to_string()),
            api_key,
            auth_timeout: parse_duration_secs(&lookup, "FANOUT_AUTH_TIMEOUT_SECS", AUTH_TIMEOUT),
            reconnect_delays: lookup("FANOUT_RECONNECT_DELAYS_MS")
                .and_then(|v| parse_delays(&v))
                .unwrap_or_else(|| DEFAULT_DELAYS.to_vec()),
            reconnect_jitter: ReconnectConfig::default()
                .with_jitter(parse(&lookup, "FANOUT_RECONNECT_JITTER", 0.0_f64))
                .jitter_factor,
            // Zero is kept here; it disables the heartbeat
            heartbeat_interval: lookup("FANOUT_HEARTBEAT_INTERVAL_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(heartbeat.ping_interval, Duration::from_secs),
            heartbeat_timeout: parse_duration_secs(
                &lookup,
                "FANOUT_HEARTBEAT_TIMEOUT_SECS",
                heartbeat.pong_timeout,
            ),
        };

        let session_defaults = SessionSettings::default();
        let sessions = SessionSettings {
            delivery_timeout: parse_duration_millis(
                &lookup,
                "FANOUT_DELIVERY_TIMEOUT_MS",
                session_defaults.delivery_timeout,
            ),
            queue_capacity: parse(
                &lookup,
                "FANOUT_SESSION_QUEUE_CAPACITY",
                session_defaults.queue_capacity,
            )
            .max(1),
        };

        let server = ServerSettings {
            http_port: parse(&lookup, "FANOUT_HTTP_PORT", ServerSettings::default().http_port),
        };

        Ok(Self {
            massive,
            sessions,
            server,
        })
    }

    /// Settings for the upstream connection manager.
    #[must_use]
    pub fn upstream_settings(&self) -> UpstreamSettings {
        let massive = &self.massive;
        let heartbeat = (!massive.heartbeat_interval.is_zero())
            .then(|| HeartbeatConfig::new(massive.heartbeat_interval, massive.heartbeat_timeout));

        UpstreamSettings {
            url: massive.url.clone(),
            api_key: massive.api_key.clone(),
            auth_timeout: massive.auth_timeout,
            reconnect: ReconnectConfig::new(massive.reconnect_delays.clone())
                .with_jitter(massive.reconnect_jitter),
            heartbeat,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Positive integer, or `None` for zero and garbage.
fn parse_positive(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|&n| n > 0)
}

/// Zero falls back to `default`.
fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| parse_positive(&v))
        .map_or(default, Duration::from_secs)
}

/// Zero falls back to `default`.
fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| parse_positive(&v))
        .map_or(default, Duration::from_millis)
}

/// Parse `"500,1500,3000"`. Any bad or zero entry rejects the whole list.
fn parse_delays(raw: &str) -> Option<Vec<Duration>> {
    let delays = raw
        .split(',')
        .map(|part| parse_positive(part).map(Duration::from_millis))
        .collect::<Option<Vec<_>>>()?;
    (!delays.is_empty()).then_some(delays)
}
