//! Chart WebSocket Endpoint
//!
//! Each browser chart opens `/ws/chart/intraday/{symbol}` and receives a
//! bar envelope per completed minute. Inbound client text is ignored.
//!
//! Frames are handed to a per-session writer task through a bounded queue,
//! so a dispatch pass never waits on a browser's socket. A full queue or a
//! finished writer surfaces as a delivery error and the session is evicted.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::AppState;
use crate::application::ports::{ClientSession, SessionError};
use crate::domain::streaming::Symbol;
use crate::domain::subscription::SessionId;

// =============================================================================
// Client Session
// =============================================================================

/// [`ClientSession`] feeding a browser socket's writer task.
#[derive(Debug)]
pub struct WsClientSession {
    id: SessionId,
    outbound: mpsc::Sender<String>,
}

impl WsClientSession {
    /// Create a session with room for `capacity` queued frames.
    ///
    /// The receiver is drained by whoever owns the socket.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let session = Self {
            id: SessionId::new(),
            outbound,
        };
        (session, rx)
    }
}

#[async_trait]
impl ClientSession for WsClientSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.outbound
            .try_send(text.to_owned())
            .map_err(|e| match e {
                TrySendError::Full(_) => SessionError::Backpressure,
                TrySendError::Closed(_) => SessionError::Closed,
            })
    }
}

// =============================================================================
// Handler
// =============================================================================

pub(super) async fn chart_ws_handler(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| run_chart_session(socket, symbol, state))
}

async fn run_chart_session(socket: WebSocket, raw_symbol: String, state: Arc<AppState>) {
    let symbol = Symbol::new(&raw_symbol);
    let (mut sender, mut receiver) = socket.split();

    if symbol.is_empty() {
        tracing::debug!(raw_symbol = %raw_symbol, "Rejecting chart socket without symbol");
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "symbol required".into(),
            })))
            .await;
        return;
    }

    let (session, mut outbound) = WsClientSession::new(state.session_queue_capacity);
    let session_id = session.id();
    state
        .supervisor
        .register_client(symbol.as_str(), Arc::new(session));
    tracing::info!(%symbol, %session_id, "Chart client connected");

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state
        .supervisor
        .unregister_client(symbol.as_str(), session_id);
    tracing::info!(%symbol, %session_id, "Chart client disconnected");
}
