//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`FeedConnector`]: Dials the upstream market data WebSocket
//! - [`ClientSession`]: Delivers text frames to one downstream chart client
//! - [`UpstreamFeed`]: Lifecycle handle for the upstream connection task
//!
//! ## Commands
//!
//! - [`UpstreamCommands`]: Fire-and-forget subscribe/unsubscribe requests
//!   from the subscription service to the upstream task

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, Stream};
use tokio::sync::{mpsc, watch};

use crate::domain::streaming::{ConnectionState, Symbol};
use crate::domain::subscription::SessionId;

// =============================================================================
// Client Session Port
// =============================================================================

/// Errors returned when delivering to a client session.
///
/// Any error marks the session dead; the dispatcher evicts it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The client connection is gone.
    #[error("session closed")]
    Closed,

    /// The session's outbound queue is full.
    #[error("session outbound queue full")]
    Backpressure,

    /// Delivery did not complete within the configured bound.
    #[error("delivery timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("session transport error: {0}")]
    Transport(String),

    /// The session implementation panicked during delivery.
    #[error("session panicked: {0}")]
    Panicked(String),
}

/// One downstream client connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientSession: Send + Sync {
    /// Stable identity used as the registry key.
    fn id(&self) -> SessionId;

    /// Deliver one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the session can no longer accept frames. A panic
    /// is handled the same way: the session is evicted.
    async fn send_text(&self, text: &str) -> Result<(), SessionError>;
}

/// Shared handle to a registered client session.
pub type SharedSession = Arc<dyn ClientSession>;

// =============================================================================
// Feed Connector Port
// =============================================================================

/// Transport errors on the upstream link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Dial or handshake failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

/// Frame exchanged with the upstream provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// JSON text frame.
    Text(String),
    /// Ping control frame.
    Ping,
    /// Pong control frame.
    Pong,
}

/// Outbound half of a feed link.
pub type FeedSink = Pin<Box<dyn Sink<FeedFrame, Error = TransportError> + Send>>;

/// Inbound half of a feed link.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedFrame, TransportError>> + Send>>;

/// An open upstream connection split into its two directions.
pub struct FeedLink {
    /// Frames to the provider.
    pub sink: FeedSink,
    /// Frames from the provider. Ends when the connection closes.
    pub stream: FeedStream,
}

impl fmt::Debug for FeedLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedLink").finish_non_exhaustive()
    }
}

/// Dials the upstream market data provider.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a new connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the dial or handshake fails.
    async fn connect(&self, url: &str) -> Result<FeedLink, TransportError>;
}

// =============================================================================
// Upstream Commands
// =============================================================================

/// Subscription change requested of the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// The symbol gained its first subscriber.
    Subscribe(Symbol),
    /// The symbol lost its last subscriber.
    Unsubscribe(Symbol),
}

/// Sending half of the command channel into the upstream task.
///
/// Sends never block. If the upstream task is gone the command is dropped.
#[derive(Debug, Clone)]
pub struct UpstreamCommands {
    tx: mpsc::UnboundedSender<UpstreamCommand>,
}

impl UpstreamCommands {
    /// Create a command channel.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpstreamCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a command for the upstream task.
    pub fn send(&self, command: UpstreamCommand) {
        if let Err(e) = self.tx.send(command) {
            tracing::debug!(command = ?e.0, "Upstream task gone, dropping command");
        }
    }
}

// =============================================================================
// Upstream Feed Port
// =============================================================================

/// Lifecycle handle for the single upstream connection.
pub trait UpstreamFeed: Send + Sync {
    /// Start the background connection task if it is not running yet.
    ///
    /// Idempotent. Must be called from within a Tokio runtime.
    fn ensure_started(&self);

    /// Whether [`ensure_started`](Self::ensure_started) has been called.
    fn is_started(&self) -> bool;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Receiver that observes every state change.
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Reconnect attempts since the process started.
    fn reconnect_attempts(&self) -> u64;

    /// Stop the background task.
    fn shutdown(&self);
}
