//! Tungstenite Connector
//!
//! [`FeedConnector`] backed by `tokio-tungstenite`. Tungstenite frames are
//! mapped onto [`FeedFrame`]s so the upstream manager never sees the
//! transport library's types.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::application::ports::{FeedConnector, FeedFrame, FeedLink, TransportError};

/// Dials the Massive socket over TLS WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<FeedLink, TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|frame: FeedFrame| future::ready(Ok::<_, TransportError>(to_message(frame))));
        let stream = read.filter_map(|item| future::ready(from_message(item)));

        Ok(FeedLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_message(frame: FeedFrame) -> Message {
    match frame {
        FeedFrame::Text(text) => Message::Text(text.into()),
        FeedFrame::Ping => Message::Ping(vec![].into()),
        FeedFrame::Pong => Message::Pong(vec![].into()),
    }
}

/// Map an inbound tungstenite item. Binary and raw frames are skipped.
fn from_message(
    item: Result<Message, tungstenite::Error>,
) -> Option<Result<FeedFrame, TransportError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(FeedFrame::Text(text.as_str().to_owned()))),
        Ok(Message::Ping(_)) => Some(Ok(FeedFrame::Ping)),
        Ok(Message::Pong(_)) => Some(Ok(FeedFrame::Pong)),
        Ok(Message::Close(frame)) => {
            tracing::debug!(?frame, "Massive sent close frame");
            Some(Err(TransportError::Closed))
        }
        Ok(Message::Binary(_) | Message::Frame(_)) => None,
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            Some(Err(TransportError::Closed))
        }
        Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
    }
}
