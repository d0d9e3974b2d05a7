#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Intraday Fanout - Live Bar Multiplexer
//!
//! Maintains a single connection to the Massive stocks WebSocket and fans
//! one-minute aggregate bars out to every browser chart watching a symbol.
//! The upstream connection opens lazily on the first chart and subscribes
//! only to symbols somebody is watching.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: Symbols, bars, connection state
//!   - `subscription`: Symbol → session registry
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Client session, feed connector, upstream feed
//!   - `services`: Subscription bookkeeping, dispatch, supervision
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `massive`: Wire codec, auth, backoff, heartbeat, upstream manager
//!   - `http`: Chart WebSocket plus health and metrics endpoints
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                        ┌──────────────┐     ┌──────────────┐
//! Massive WS ◄──────────►│   Upstream   │────►│  Dispatcher  │──► Chart 1
//!   (AM.* bars,          │   Manager    │     └──────┬───────┘──► Chart 2
//!    sub/unsub)          └──────▲───────┘            │        ──► Chart N
//!                               │ commands           │ evict
//!                        ┌──────┴───────┐            │
//!                        │ Subscription │◄───────────┘
//!                        │   Service    │◄── register / unregister
//!                        └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{Bar, ConnectionState, Symbol};
pub use domain::subscription::{RegistryStats, SessionId, SubscriptionRegistry};

// Application services
pub use application::ports::{ClientSession, FeedConnector, SessionError, UpstreamFeed};
pub use application::services::{FanoutStats, FanoutSupervisor};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FanoutConfig};

// Massive adapters
pub use infrastructure::massive::{TungsteniteConnector, build_fanout};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, WsClientSession};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
