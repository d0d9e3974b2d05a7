//! Shared fixtures: a local Massive stand-in and channel-backed sessions.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use intraday_fanout::{ClientSession, FanoutConfig, SessionError, SessionId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub const API_KEY: &str = "test-key";
pub const AUTH: &str = r#"{"action":"auth","params":"test-key"}"#;
pub const AUTH_OK: &str = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
pub const AUTH_FAILED: &str =
    r#"[{"ev":"status","status":"auth_failed","message":"authentication failed"}]"#;

const WAIT: Duration = Duration::from_secs(5);

/// Minute bar for `symbol` with the fixed reference values.
pub fn bar_json(symbol: &str) -> String {
    format!(
        r#"[{{"ev":"AM","sym":"{symbol}","t":1700000000000,"o":10.0,"h":11.0,"l":9.0,"c":10.5,"v":500}}]"#
    )
}

/// Client frame produced by [`bar_json`].
pub const BAR_FRAME: &str =
    r#"{"type":"bar","bar":{"t":1700000000000,"o":10.0,"h":11.0,"l":9.0,"c":10.5,"v":500.0}}"#;

/// Fanout config pointed at `url` with the heartbeat disabled.
pub fn fanout_config(url: &str) -> FanoutConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("MASSIVE_API_KEY", API_KEY.to_string()),
        ("MASSIVE_WS_URL", url.to_string()),
        ("FANOUT_HEARTBEAT_INTERVAL_SECS", "0".to_string()),
    ]);
    FanoutConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

// =============================================================================
// Mock Massive Server
// =============================================================================

/// Local WebSocket server standing in for Massive.
pub struct MockMassive {
    pub url: String,
    conns: mpsc::UnboundedReceiver<MockConn>,
}

impl MockMassive {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, conns) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await
                    && tx.send(MockConn { ws }).is_err()
                {
                    break;
                }
            }
        });

        Self { url, conns }
    }

    pub async fn next_conn(&mut self) -> MockConn {
        tokio::time::timeout(WAIT, self.conns.recv())
            .await
            .expect("no upstream connection")
            .expect("mock server stopped")
    }
}

/// Server side of one upstream connection.
pub struct MockConn {
    ws: WebSocketStream<TcpStream>,
}

impl MockConn {
    pub async fn next_text(&mut self) -> String {
        loop {
            let message = tokio::time::timeout(WAIT, self.ws.next())
                .await
                .expect("no frame from fanout")
                .expect("fanout closed connection")
                .unwrap();
            if let Message::Text(text) = message {
                return text.as_str().to_owned();
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    pub async fn authenticate(&mut self) {
        assert_eq!(self.next_text().await, AUTH);
        self.send_text(AUTH_OK).await;
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// Session that forwards frames to a channel, or fails when told to.
pub struct ChannelSession {
    id: SessionId,
    tx: mpsc::UnboundedSender<String>,
    fail: AtomicBool,
}

impl ChannelSession {
    pub fn new() -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = std::sync::Arc::new(Self {
            id: SessionId::new(),
            tx,
            fail: AtomicBool::new(false),
        });
        (session, rx)
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientSession for ChannelSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.tx
            .send(text.to_string())
            .map_err(|_| SessionError::Closed)
    }
}

/// Next frame delivered to a session.
pub async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no frame delivered")
        .expect("session channel closed")
}
