//! Massive WebSocket Adapters
//!
//! Client side of the Massive stocks socket:
//!
//! - **Wire**: control commands, status events, minute aggregates (JSON)
//! - **Auth**: API key handshake with a bounded wait
//! - **Upstream**: the single shared connection, with backoff and heartbeat
//! - **Connector**: `tokio-tungstenite` transport

pub mod auth;
pub mod codec;
pub mod connector;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod upstream;

use std::sync::Arc;

pub use auth::{AUTH_TIMEOUT, ApiKey, AuthError, AuthHandshake};
pub use codec::{CodecError, JsonCodec};
pub use connector::TungsteniteConnector;
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{Action, AggregateMessage, ControlRequest, FeedMessage};
pub use reconnect::{DEFAULT_DELAYS, ReconnectConfig, ReconnectPolicy};
pub use upstream::{UpstreamError, UpstreamManager, UpstreamSettings};

use crate::application::ports::{FeedConnector, UpstreamCommands, UpstreamFeed};
use crate::application::services::{FanoutDispatcher, FanoutSupervisor, SubscriptionService};
use crate::infrastructure::config::FanoutConfig;

/// Wire the registry, dispatcher, and upstream manager into a supervisor.
///
/// Nothing connects until the first client registers.
#[must_use]
pub fn build_fanout(config: &FanoutConfig, connector: Arc<dyn FeedConnector>) -> Arc<FanoutSupervisor> {
    let (commands, command_rx) = UpstreamCommands::channel();
    let subscriptions = Arc::new(SubscriptionService::new(commands));
    let dispatcher = FanoutDispatcher::new(Arc::clone(&subscriptions), config.sessions.delivery_timeout);

    let upstream = UpstreamManager::new(
        config.upstream_settings(),
        connector,
        Arc::clone(&subscriptions),
        dispatcher,
        command_rx,
    );

    Arc::new(FanoutSupervisor::new(
        subscriptions,
        Arc::new(upstream) as Arc<dyn UpstreamFeed>,
    ))
}
