//! Fanout Supervisor
//!
//! Public entry point used by the HTTP layer. Owns the subscription service
//! and the upstream feed handle, and starts the upstream connection lazily
//! on the first registration.
//!
//! # Example
//!
//! ```rust,ignore
//! let supervisor = build_fanout(&config, Arc::new(TungsteniteConnector::new()));
//!
//! supervisor.register_client("aapl", session.clone());
//! // ... bars flow to `session` ...
//! supervisor.unregister_client("aapl", session.id());
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use super::subscription::SubscriptionService;
use crate::application::ports::{SharedSession, UpstreamFeed};
use crate::domain::streaming::{ConnectionState, Symbol};
use crate::domain::subscription::SessionId;

/// Point-in-time view of the fanout engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanoutStats {
    /// Whether the upstream task has been started.
    pub upstream_started: bool,
    /// Current upstream state.
    #[serde(serialize_with = "serialize_state")]
    pub upstream_state: ConnectionState,
    /// Reconnect attempts since start.
    pub reconnect_attempts: u64,
    /// Symbols with at least one session.
    pub active_symbols: usize,
    /// (symbol, session) registrations.
    pub registered_sessions: usize,
}

fn serialize_state<S: serde::Serializer>(
    state: &ConnectionState,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(state.as_str())
}

/// Multiplexes chart sessions onto the single upstream connection.
pub struct FanoutSupervisor {
    subscriptions: Arc<SubscriptionService>,
    upstream: Arc<dyn UpstreamFeed>,
}

impl FanoutSupervisor {
    /// Assemble a supervisor from its parts.
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionService>, upstream: Arc<dyn UpstreamFeed>) -> Self {
        Self {
            subscriptions,
            upstream,
        }
    }

    /// Register `session` for bars of `symbol`.
    ///
    /// The symbol is trimmed and uppercased. Starts the upstream connection
    /// if needed. Registering the same session twice is a no-op. An empty
    /// symbol is ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register_client(&self, symbol: &str, session: SharedSession) {
        let symbol = Symbol::new(symbol);
        if symbol.is_empty() {
            tracing::warn!(session_id = %session.id(), "Ignoring registration with empty symbol");
            return;
        }

        self.upstream.ensure_started();
        if self.subscriptions.subscribe(&symbol, session) {
            tracing::info!(%symbol, "Symbol became active");
        }
    }

    /// Remove `session_id` from `symbol`.
    ///
    /// Unknown symbols or sessions are ignored.
    pub fn unregister_client(&self, symbol: &str, session_id: SessionId) {
        let symbol = Symbol::new(symbol);
        if self.subscriptions.unsubscribe(&symbol, session_id) {
            tracing::info!(%symbol, "Symbol became inactive");
        }
    }

    /// Current upstream state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.upstream.state()
    }

    /// Receiver observing upstream state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.upstream.watch_state()
    }

    /// Engine snapshot for health reporting.
    #[must_use]
    pub fn stats(&self) -> FanoutStats {
        let registry = self.subscriptions.stats();
        FanoutStats {
            upstream_started: self.upstream.is_started(),
            upstream_state: self.upstream.state(),
            reconnect_attempts: self.upstream.reconnect_attempts(),
            active_symbols: registry.symbol_count,
            registered_sessions: registry.session_count,
        }
    }

    /// Stop the upstream connection task.
    pub fn shutdown(&self) {
        self.upstream.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::application::ports::{MockClientSession, UpstreamCommand, UpstreamCommands};

    /// Feed stub that only counts lifecycle calls.
    struct StubFeed {
        starts: AtomicUsize,
        stopped: AtomicBool,
        state: watch::Sender<ConnectionState>,
    }

    impl StubFeed {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stopped: AtomicBool::new(false),
                state: watch::Sender::new(ConnectionState::Disconnected),
            })
        }
    }

    impl UpstreamFeed for StubFeed {
        fn ensure_started(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn is_started(&self) -> bool {
            self.starts.load(Ordering::SeqCst) > 0
        }

        fn state(&self) -> ConnectionState {
            *self.state.borrow()
        }

        fn watch_state(&self) -> watch::Receiver<ConnectionState> {
            self.state.subscribe()
        }

        fn reconnect_attempts(&self) -> u64 {
            0
        }

        fn shutdown(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn session() -> SharedSession {
        let id = SessionId::new();
        let mut mock = MockClientSession::new();
        mock.expect_id().return_const(id);
        Arc::new(mock)
    }

    fn setup() -> (
        FanoutSupervisor,
        Arc<StubFeed>,
        mpsc::UnboundedReceiver<UpstreamCommand>,
    ) {
        let (commands, rx) = UpstreamCommands::channel();
        let feed = StubFeed::new();
        let supervisor = FanoutSupervisor::new(
            Arc::new(SubscriptionService::new(commands)),
            Arc::clone(&feed) as Arc<dyn UpstreamFeed>,
        );
        (supervisor, feed, rx)
    }

    #[test]
    fn nothing_starts_before_first_registration() {
        let (supervisor, feed, _rx) = setup();
        assert!(!supervisor.stats().upstream_started);
        assert_eq!(feed.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn registration_normalizes_and_starts_upstream() {
        let (supervisor, feed, mut rx) = setup();

        supervisor.register_client(" aapl ", session());

        assert!(feed.is_started());
        assert_eq!(
            rx.try_recv().unwrap(),
            UpstreamCommand::Subscribe(Symbol::new("AAPL"))
        );
    }

    #[test]
    fn unregister_with_different_case_matches() {
        let (supervisor, _feed, mut rx) = setup();
        let s = session();
        let id = s.id();

        supervisor.register_client("msft", s);
        let _ = rx.try_recv();

        supervisor.unregister_client("MSFT", id);

        assert_eq!(
            rx.try_recv().unwrap(),
            UpstreamCommand::Unsubscribe(Symbol::new("MSFT"))
        );
        assert_eq!(supervisor.stats().active_symbols, 0);
    }

    #[test]
    fn empty_symbol_is_ignored() {
        let (supervisor, feed, mut rx) = setup();

        supervisor.register_client("   ", session());

        assert!(!feed.is_started());
        assert!(rx.try_recv().is_err());
        assert_eq!(supervisor.stats().registered_sessions, 0);
    }

    #[test]
    fn stats_reflect_registrations() {
        let (supervisor, _feed, _rx) = setup();
        let shared = session();

        supervisor.register_client("AAPL", Arc::clone(&shared));
        supervisor.register_client("MSFT", shared);
        supervisor.register_client("AAPL", session());

        let stats = supervisor.stats();
        assert_eq!(stats.active_symbols, 2);
        assert_eq!(stats.registered_sessions, 3);
        assert_eq!(stats.upstream_state, ConnectionState::Disconnected);
    }

    #[test]
    fn stats_serialize_state_name() {
        let (supervisor, feed, _rx) = setup();
        feed.state.send_replace(ConnectionState::AwaitingAuth);

        let json = serde_json::to_value(supervisor.stats()).unwrap();
        assert_eq!(json["upstream_state"], "awaiting_auth");
    }

    #[test]
    fn shutdown_is_forwarded() {
        let (supervisor, feed, _rx) = setup();
        supervisor.shutdown();
        assert!(feed.stopped.load(Ordering::SeqCst));
    }
}
