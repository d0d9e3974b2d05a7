//! Upstream Connection Manager
//!
//! Owns the single connection to the Massive stocks socket and drives it
//! through its lifecycle:
//!
//! ```text
//! Disconnected ──► Connecting ──► AwaitingAuth ──► Streaming
//!      ▲               │               │               │
//!      └───────────────┴───────────────┴───────────────┘
//!                  (backoff, then retry forever)
//! ```
//!
//! One background task holds the socket. Subscription changes reach it as
//! [`UpstreamCommand`]s; while streaming each command is reconciled against
//! the registry and the set of channels already subscribed on this
//! connection, so the provider sees at most one subscribe per activation.
//! Commands that arrive while not streaming are discarded in favour of the
//! full resubscribe sent right after authentication.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::auth::{AUTH_TIMEOUT, ApiKey, AuthError, AuthHandshake};
use super::codec::JsonCodec;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{ControlRequest, FeedMessage};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    FeedConnector, FeedFrame, FeedLink, FeedSink, FeedStream, TransportError, UpstreamCommand,
    UpstreamFeed,
};
use crate::application::services::{FanoutDispatcher, SubscriptionService};
use crate::domain::streaming::{Bar, ConnectionState, Symbol};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream connection.
///
/// None of these stop the manager; each one leads to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Dial, read, or write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Authentication was rejected or timed out.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A control command could not be encoded.
    #[error("failed to encode control command: {0}")]
    Encode(#[from] serde_json::Error),

    /// The provider ended the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// No inbound traffic within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

impl UpstreamError {
    /// Whether the provider refused our credentials.
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Auth(AuthError::Rejected { .. }))
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Provider API key.
    pub api_key: ApiKey,
    /// Bound on the auth handshake.
    pub auth_timeout: Duration,
    /// Backoff schedule.
    pub reconnect: ReconnectConfig,
    /// Ping/pong monitoring; `None` disables it.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl UpstreamSettings {
    /// Settings with default timing for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            url: url.into(),
            api_key,
            auth_timeout: AUTH_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            heartbeat: Some(HeartbeatConfig::default()),
        }
    }
}

// =============================================================================
// Upstream Manager
// =============================================================================

/// Handle to the upstream connection task.
///
/// Construction does no I/O. The task is spawned by the first
/// [`UpstreamFeed::ensure_started`] call and runs until
/// [`UpstreamFeed::shutdown`].
pub struct UpstreamManager {
    started: AtomicBool,
    task: Mutex<Option<UpstreamTask>>,
    state: watch::Receiver<ConnectionState>,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl UpstreamManager {
    /// Create a manager.
    ///
    /// `commands` is the receiving half of the channel the subscription
    /// service sends to.
    #[must_use]
    pub fn new(
        settings: UpstreamSettings,
        connector: Arc<dyn FeedConnector>,
        subscriptions: Arc<SubscriptionService>,
        dispatcher: FanoutDispatcher,
        commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    ) -> Self {
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let reconnects = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let task = UpstreamTask {
            handshake: AuthHandshake::new(settings.api_key.clone()),
            settings,
            connector,
            subscriptions,
            dispatcher,
            commands,
            state_tx,
            reconnects: Arc::clone(&reconnects),
            cancel: cancel.clone(),
            codec: JsonCodec::new(),
        };

        Self {
            started: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
            state,
            reconnects,
            cancel,
        }
    }
}

impl UpstreamFeed for UpstreamManager {
    fn ensure_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.task.lock().take() {
            tracing::info!("Starting upstream connection task");
            let handle = tokio::spawn(task.run());
            tokio::spawn(async move {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "Upstream connection task panicked");
                }
            });
        }
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn reconnect_attempts(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// State owned by the background task.
struct UpstreamTask {
    settings: UpstreamSettings,
    handshake: AuthHandshake,
    connector: Arc<dyn FeedConnector>,
    subscriptions: Arc<SubscriptionService>,
    dispatcher: FanoutDispatcher,
    commands: mpsc::UnboundedReceiver<UpstreamCommand>,
    state_tx: watch::Sender<ConnectionState>,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
    codec: JsonCodec,
}

impl UpstreamTask {
    /// Connect, stream, and reconnect until cancelled.
    async fn run(mut self) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect.clone());
        let cancel = self.cancel.clone();

        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.connect_and_stream(&mut policy) => result,
            };
            let Err(error) = result;

            self.set_state(ConnectionState::Disconnected);

            if error.is_auth_rejection() {
                tracing::error!(error = %error, "Massive rejected credentials");
                metrics::record_auth_rejected();
            } else {
                tracing::warn!(error = %error, "Massive connection error");
            }

            let delay = policy.next_delay();
            let total = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::record_reconnect();
            tracing::info!(
                attempt = policy.attempt_count(),
                total_reconnects = total,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to Massive stream"
            );

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Upstream connection task stopped");
    }

    /// One connection lifetime. Only ever returns an error.
    async fn connect_and_stream(
        &mut self,
        policy: &mut ReconnectPolicy,
    ) -> Result<Infallible, UpstreamError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.settings.url, "Connecting to Massive stream");

        let FeedLink {
            mut sink,
            mut stream,
        } = self.connector.connect(&self.settings.url).await?;

        self.set_state(ConnectionState::AwaitingAuth);
        send_request(&mut sink, &self.handshake.request()).await?;
        self.await_auth(&mut stream).await?;

        policy.reset();
        self.set_state(ConnectionState::Streaming);
        tracing::info!("Massive stream authenticated");

        self.stream(&mut sink, &mut stream).await
    }

    /// Wait for the auth verdict, ignoring unrelated traffic.
    async fn await_auth(&self, stream: &mut FeedStream) -> Result<(), UpstreamError> {
        let timeout = self.settings.auth_timeout;

        let verdict = async {
            while let Some(frame) = stream.next().await {
                let FeedFrame::Text(text) = frame? else {
                    continue;
                };
                for message in self.decode(&text) {
                    if let Some(verdict) = self.handshake.verdict(&message) {
                        return verdict.map_err(UpstreamError::from);
                    }
                }
            }
            Err(UpstreamError::ConnectionClosed)
        };

        tokio::time::timeout(timeout, verdict)
            .await
            .map_err(|_| AuthError::Timeout(timeout))?
    }

    /// Streaming phase: resubscribe, then pump frames and commands.
    async fn stream(
        &mut self,
        sink: &mut FeedSink,
        stream: &mut FeedStream,
    ) -> Result<Infallible, UpstreamError> {
        // Anything queued before now is covered by the snapshot
        while self.commands.try_recv().is_ok() {}

        let mut subscribed = self.subscriptions.active_symbols();
        if let Some(request) = ControlRequest::subscribe(&subscribed) {
            tracing::info!(symbols = subscribed.len(), "Subscribing active symbols");
            send_request(sink, &request).await?;
        }

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        if let Some(config) = self.settings.heartbeat.clone() {
            let manager = HeartbeatManager::new(
                config,
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            );
            tokio::spawn(manager.run());
        }

        loop {
            tokio::select! {
                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        heartbeat_state.mark_ping_sent();
                        sink.send(FeedFrame::Ping).await?;
                    }
                    HeartbeatEvent::Timeout => return Err(UpstreamError::HeartbeatTimeout),
                },
                Some(command) = self.commands.recv() => {
                    self.apply_command(sink, &mut subscribed, command).await?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(FeedFrame::Text(text))) => {
                        heartbeat_state.record_activity();
                        self.handle_text(&text).await?;
                    }
                    // The transport answers pings itself
                    Some(Ok(FeedFrame::Ping | FeedFrame::Pong)) => heartbeat_state.record_activity(),
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(UpstreamError::ConnectionClosed),
                },
            }
        }
    }

    /// Reconcile one command with the registry and this connection's
    /// subscribed set, sending at most one control frame.
    async fn apply_command(
        &self,
        sink: &mut FeedSink,
        subscribed: &mut BTreeSet<Symbol>,
        command: UpstreamCommand,
    ) -> Result<(), UpstreamError> {
        let request = match command {
            UpstreamCommand::Subscribe(symbol) => {
                if !self.subscriptions.is_active(&symbol) || !subscribed.insert(symbol.clone()) {
                    return Ok(());
                }
                ControlRequest::subscribe([&symbol])
            }
            UpstreamCommand::Unsubscribe(symbol) => {
                if self.subscriptions.is_active(&symbol) || !subscribed.remove(&symbol) {
                    return Ok(());
                }
                ControlRequest::unsubscribe([&symbol])
            }
        };

        if let Some(request) = request {
            send_request(sink, &request).await?;
        }
        Ok(())
    }

    /// Route every message in a streaming-phase text frame.
    async fn handle_text(&self, text: &str) -> Result<(), UpstreamError> {
        for message in self.decode(text) {
            match &message {
                FeedMessage::Bar(bar) => self.forward(bar).await,
                FeedMessage::AuthFailure { .. } => {
                    if let Some(Err(e)) = self.handshake.verdict(&message) {
                        return Err(e.into());
                    }
                }
                FeedMessage::AuthSuccess | FeedMessage::Unrecognized => {}
            }
        }
        Ok(())
    }

    async fn forward(&self, bar: &Bar) {
        let started = Instant::now();
        let outcome = self.dispatcher.dispatch(bar).await;

        if outcome.delivered == 0 && outcome.evicted == 0 {
            metrics::record_message_dropped(DropReason::NoSubscribers);
            return;
        }

        metrics::record_bars_delivered(u64::try_from(outcome.delivered).unwrap_or(u64::MAX));
        if outcome.evicted > 0 {
            metrics::record_sessions_evicted(u64::try_from(outcome.evicted).unwrap_or(u64::MAX));
        }
        metrics::record_dispatch_duration(started.elapsed());
    }

    fn decode(&self, text: &str) -> Vec<FeedMessage> {
        metrics::record_frame_received();
        self.codec.decode(text).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Dropping upstream frame");
            metrics::record_message_dropped(e.drop_reason());
            Vec::new()
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Upstream state changed");
            metrics::set_upstream_state(state);
        }
    }
}

async fn send_request(sink: &mut FeedSink, request: &ControlRequest) -> Result<(), UpstreamError> {
    let json = request.to_json()?;
    sink.send(FeedFrame::Text(json)).await?;

    metrics::record_upstream_command(request.action.as_str());
    tracing::debug!(?request, "Sent control command");
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use tokio::time::Instant as TokioInstant;

    use super::*;
    use crate::application::ports::{ClientSession, SessionError, SharedSession, UpstreamCommands};
    use crate::domain::subscription::SessionId;

    const AUTH: &str = r#"{"action":"auth","params":"test-key"}"#;
    const AUTH_OK: &str = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
    const AUTH_FAILED: &str = r#"[{"ev":"status","status":"auth_failed","message":"authentication failed"}]"#;
    const AAPL_BAR: &str =
        r#"[{"ev":"AM","sym":"AAPL","t":1700000000000,"o":10.0,"h":11.0,"l":9.0,"c":10.5,"v":500}]"#;
    const AAPL_FRAME: &str =
        r#"{"type":"bar","bar":{"t":1700000000000,"o":10.0,"h":11.0,"l":9.0,"c":10.5,"v":500.0}}"#;

    // -------------------------------------------------------------------------
    // In-memory transport
    // -------------------------------------------------------------------------

    /// Server side of one fake connection.
    struct FakeConn {
        to_client: fmpsc::UnboundedSender<Result<FeedFrame, TransportError>>,
        from_client: fmpsc::UnboundedReceiver<FeedFrame>,
    }

    impl FakeConn {
        fn push(&self, text: &str) {
            let _ = self.to_client.unbounded_send(Ok(FeedFrame::Text(text.to_string())));
        }

        async fn next_text(&mut self) -> String {
            match self.from_client.next().await {
                Some(FeedFrame::Text(text)) => text,
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        async fn authenticate(&mut self) {
            assert_eq!(self.next_text().await, AUTH);
            self.push(AUTH_OK);
        }
    }

    /// Connector handing each new connection to the test.
    struct FakeConnector {
        conns: mpsc::UnboundedSender<FakeConn>,
        fail: AtomicBool,
        attempts: Mutex<Vec<TokioInstant>>,
    }

    #[async_trait]
    impl FeedConnector for FakeConnector {
        async fn connect(&self, _url: &str) -> Result<FeedLink, TransportError> {
            self.attempts.lock().push(TokioInstant::now());
            if self.fail.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("connection refused".to_string()));
            }

            let (to_client, client_rx) = fmpsc::unbounded();
            let (client_tx, from_client) = fmpsc::unbounded();
            self.conns
                .send(FakeConn {
                    to_client,
                    from_client,
                })
                .map_err(|_| TransportError::Connect("test finished".to_string()))?;

            Ok(FeedLink {
                sink: Box::pin(
                    client_tx.sink_map_err(|e| TransportError::Send(e.to_string())),
                ),
                stream: Box::pin(client_rx),
            })
        }
    }

    /// Session forwarding frames to a channel.
    struct ChannelSession {
        id: SessionId,
        tx: mpsc::UnboundedSender<String>,
        fail: bool,
    }

    #[async_trait]
    impl ClientSession for ChannelSession {
        fn id(&self) -> SessionId {
            self.id
        }

        async fn send_text(&self, text: &str) -> Result<(), SessionError> {
            if self.fail {
                return Err(SessionError::Closed);
            }
            self.tx
                .send(text.to_string())
                .map_err(|_| SessionError::Closed)
        }
    }

    fn channel_session(fail: bool) -> (SharedSession, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(ChannelSession {
            id: SessionId::new(),
            tx,
            fail,
        });
        (session, rx)
    }

    struct Harness {
        manager: UpstreamManager,
        subscriptions: Arc<SubscriptionService>,
        connector: Arc<FakeConnector>,
        conns: mpsc::UnboundedReceiver<FakeConn>,
    }

    impl Harness {
        fn new() -> Self {
            let (commands, command_rx) = UpstreamCommands::channel();
            let subscriptions = Arc::new(SubscriptionService::new(commands));
            let dispatcher = FanoutDispatcher::new(Arc::clone(&subscriptions), Duration::from_secs(1));
            let (conn_tx, conns) = mpsc::unbounded_channel();
            let connector = Arc::new(FakeConnector {
                conns: conn_tx,
                fail: AtomicBool::new(false),
                attempts: Mutex::new(Vec::new()),
            });

            let settings = UpstreamSettings {
                heartbeat: None,
                ..UpstreamSettings::new("ws://fake", ApiKey::new("test-key").unwrap())
            };
            let manager = UpstreamManager::new(
                settings,
                Arc::clone(&connector) as Arc<dyn FeedConnector>,
                Arc::clone(&subscriptions),
                dispatcher,
                command_rx,
            );

            Self {
                manager,
                subscriptions,
                connector,
                conns,
            }
        }

        async fn next_conn(&mut self) -> FakeConn {
            self.conns.recv().await.unwrap()
        }

        async fn wait_for(&self, state: ConnectionState) {
            let mut rx = self.manager.watch_state();
            rx.wait_for(|s| *s == state).await.unwrap();
        }

        fn subscribe(&self, symbol: &str, session: SharedSession) {
            self.subscriptions.subscribe(&Symbol::new(symbol), session);
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn nothing_happens_until_started() {
        let mut h = Harness::new();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(h.conns.try_recv().is_err());
        assert!(!h.manager.is_started());
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_started_is_idempotent() {
        let mut h = Harness::new();
        h.manager.ensure_started();
        h.manager.ensure_started();

        let _conn = h.next_conn().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.connector.attempts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_then_full_subscribe() {
        let mut h = Harness::new();
        let (s1, _rx1) = channel_session(false);
        let (s2, _rx2) = channel_session(false);
        h.subscribe("MSFT", s1);
        h.subscribe("AAPL", s2);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        assert_eq!(conn.next_text().await, AUTH);
        h.wait_for(ConnectionState::AwaitingAuth).await;

        conn.push(AUTH_OK);
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.AAPL,AM.MSFT"}"#
        );
        h.wait_for(ConnectionState::Streaming).await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_sends_no_subscribe() {
        let mut h = Harness::new();
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        h.wait_for(ConnectionState::Streaming).await;

        let (s, _rx) = channel_session(false);
        h.subscribe("NVDA", s);
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.NVDA"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn single_subscribe_and_unsubscribe_while_streaming() {
        let mut h = Harness::new();
        h.manager.ensure_started();
        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        h.wait_for(ConnectionState::Streaming).await;

        let (s1, _rx1) = channel_session(false);
        let (s2, _rx2) = channel_session(false);
        let (id1, id2) = (s1.id(), s2.id());
        let aapl = Symbol::new("AAPL");

        h.subscriptions.subscribe(&aapl, s1);
        h.subscriptions.subscribe(&aapl, s2);
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.AAPL"}"#
        );

        h.subscriptions.unsubscribe(&aapl, id1);
        h.subscriptions.unsubscribe(&aapl, id2);
        // The next frame is the unsubscribe: no second subscribe went out
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"unsubscribe","params":"AM.AAPL"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn changes_during_auth_are_folded_into_resubscribe() {
        let mut h = Harness::new();
        let (s1, _rx1) = channel_session(false);
        h.subscribe("AAPL", s1);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        assert_eq!(conn.next_text().await, AUTH);

        let (s2, _rx2) = channel_session(false);
        let s2_id = s2.id();
        h.subscribe("MSFT", s2);

        conn.push(AUTH_OK);
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.AAPL,AM.MSFT"}"#
        );

        h.subscriptions.unsubscribe(&Symbol::new("MSFT"), s2_id);
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"unsubscribe","params":"AM.MSFT"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resubscribes_snapshot() {
        let mut h = Harness::new();
        let (s1, _rx1) = channel_session(false);
        let (s2, _rx2) = channel_session(false);
        h.subscribe("TSLA", s1);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.TSLA"}"#
        );

        h.subscribe("AMD", s2);
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.AMD"}"#
        );

        let dropped_at = TokioInstant::now();
        drop(conn);

        let mut conn = h.next_conn().await;
        assert_eq!(dropped_at.elapsed(), Duration::from_millis(500));
        assert_eq!(h.manager.reconnect_attempts(), 1);

        conn.authenticate().await;
        assert_eq!(
            conn.next_text().await,
            r#"{"action":"subscribe","params":"AM.AMD,AM.TSLA"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_disconnects_and_retries_after_half_second() {
        let mut h = Harness::new();
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        assert_eq!(conn.next_text().await, AUTH);

        let mut states = h.manager.watch_state();
        let rejected_at = TokioInstant::now();
        conn.push(AUTH_FAILED);

        states
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        let _conn = h.next_conn().await;
        assert_eq!(rejected_at.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_timeout_after_five_seconds() {
        let mut h = Harness::new();
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        let sent_at = TokioInstant::now();
        assert_eq!(conn.next_text().await, AUTH);
        // Unrelated status does not end the wait
        conn.push(r#"[{"ev":"status","status":"connected"}]"#);

        let _conn = h.next_conn().await;
        assert_eq!(sent_at.elapsed(), Duration::from_millis(5500));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_steps_then_holds() {
        let mut h = Harness::new();
        h.connector.fail.store(true, Ordering::SeqCst);
        h.manager.ensure_started();

        tokio::time::sleep(Duration::from_millis(8600)).await;

        let attempts = h.connector.attempts.lock().clone();
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1500),
                Duration::from_millis(3000),
                Duration::from_millis(3000),
            ]
        );
        assert!(h.conns.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_streaming() {
        let mut h = Harness::new();
        h.manager.ensure_started();

        // Fail the handshake twice so the schedule advances
        for _ in 0..2 {
            let mut conn = h.next_conn().await;
            assert_eq!(conn.next_text().await, AUTH);
            conn.push(AUTH_FAILED);
        }

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        h.wait_for(ConnectionState::Streaming).await;

        let dropped_at = TokioInstant::now();
        drop(conn);
        let _conn = h.next_conn().await;
        assert_eq!(dropped_at.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_task() {
        let mut h = Harness::new();
        h.manager.ensure_started();
        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        h.wait_for(ConnectionState::Streaming).await;

        h.manager.shutdown();
        h.wait_for(ConnectionState::Disconnected).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.conns.try_recv().is_err());
    }

    // -------------------------------------------------------------------------
    // Streaming
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn bars_reach_subscribers() {
        let mut h = Harness::new();
        let (aapl, mut aapl_rx) = channel_session(false);
        let (msft, mut msft_rx) = channel_session(false);
        h.subscribe("AAPL", aapl);
        h.subscribe("MSFT", msft);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        let _ = conn.next_text().await;

        conn.push(AAPL_BAR);

        assert_eq!(aapl_rx.recv().await.unwrap(), AAPL_FRAME);
        assert!(msft_rx.try_recv().is_err());
    }

    struct PanickingSession(SessionId);

    #[async_trait]
    impl ClientSession for PanickingSession {
        fn id(&self) -> SessionId {
            self.0
        }

        async fn send_text(&self, _text: &str) -> Result<(), SessionError> {
            panic!("chart writer bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_session_does_not_stop_stream() {
        let mut h = Harness::new();
        let (healthy, mut healthy_rx) = channel_session(false);
        h.subscribe("AAPL", Arc::new(PanickingSession(SessionId::new())));
        h.subscribe("AAPL", healthy);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        let _ = conn.next_text().await;

        conn.push(AAPL_BAR);
        assert_eq!(healthy_rx.recv().await.unwrap(), AAPL_FRAME);
        conn.push(AAPL_BAR);
        assert_eq!(healthy_rx.recv().await.unwrap(), AAPL_FRAME);

        assert_eq!(h.manager.state(), ConnectionState::Streaming);
        assert_eq!(h.subscriptions.stats().session_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_ignored() {
        let mut h = Harness::new();
        let (aapl, mut aapl_rx) = channel_session(false);
        h.subscribe("AAPL", aapl);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        let _ = conn.next_text().await;

        conn.push("not json");
        conn.push("42");
        conn.push(r#"[{"ev":"AM","sym":"AAPL","t":1700000000000}]"#);
        conn.push(r#"[{"ev":"XQ","sym":"AAPL"}]"#);
        conn.push(AAPL_BAR);

        assert_eq!(aapl_rx.recv().await.unwrap(), AAPL_FRAME);
        assert!(aapl_rx.try_recv().is_err());
        assert_eq!(h.manager.state(), ConnectionState::Streaming);
        assert!(h.subscriptions.is_active(&Symbol::new("AAPL")));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_last_session_triggers_unsubscribe() {
        let mut h = Harness::new();
        let (dead, _rx) = channel_session(true);
        h.subscribe("AAPL", dead);
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        let _ = conn.next_text().await;

        conn.push(AAPL_BAR);

        assert_eq!(
            conn.next_text().await,
            r#"{"action":"unsubscribe","params":"AM.AAPL"}"#
        );
        assert!(!h.subscriptions.is_active(&Symbol::new("AAPL")));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_while_streaming_reconnects() {
        let mut h = Harness::new();
        h.manager.ensure_started();

        let mut conn = h.next_conn().await;
        conn.authenticate().await;
        h.wait_for(ConnectionState::Streaming).await;

        conn.push(AUTH_FAILED);

        let _conn = h.next_conn().await;
        assert_eq!(h.manager.reconnect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_reconnects() {
        let (commands, command_rx) = UpstreamCommands::channel();
        let subscriptions = Arc::new(SubscriptionService::new(commands));
        let dispatcher = FanoutDispatcher::new(Arc::clone(&subscriptions), Duration::from_secs(1));
        let (conn_tx, mut conns) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            conns: conn_tx,
            fail: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
        });
        let settings = UpstreamSettings::new("ws://fake", ApiKey::new("test-key").unwrap());
        let manager = UpstreamManager::new(settings, connector, subscriptions, dispatcher, command_rx);
        manager.ensure_started();

        let mut conn = conns.recv().await.unwrap();
        conn.authenticate().await;
        let streaming_at = TokioInstant::now();

        // Ping at 20 s goes unanswered; the 40 s check declares the link dead
        assert_eq!(conn.from_client.next().await, Some(FeedFrame::Ping));
        let _conn = conns.recv().await.unwrap();
        assert_eq!(streaming_at.elapsed(), Duration::from_millis(40_500));
    }
}
