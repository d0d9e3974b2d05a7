//! Market Data Streaming Types
//!
//! Core domain types for the intraday feed: symbols, minute bars, and the
//! upstream connection state. These types are codec-agnostic except for the
//! downstream chart envelope, which is part of the public contract with the
//! browser client.

use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;

// =============================================================================
// Symbol
// =============================================================================

/// A ticker symbol, normalized to trimmed uppercase.
///
/// Every entry point builds symbols through [`Symbol::new`], so two symbols
/// compare equal exactly when they route to the same subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw ticker into a routing symbol.
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// The normalized ticker text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether normalization left nothing behind.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Bar
// =============================================================================

/// One OHLCV sample for a symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    /// Symbol the bar belongs to.
    pub symbol: Symbol,
    /// Bar start time, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
}

impl Bar {
    /// Encode the bar as the chart client's text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_client_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&ClientBarFrame::from(self))
    }
}

/// Downstream envelope sent to chart clients.
///
/// # Wire Format (JSON)
/// ```json
/// {"type":"bar","bar":{"t":1700000000000,"o":10.0,"h":11.0,"l":9.0,"c":10.5,"v":500.0}}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ClientBarFrame {
    /// Frame discriminator (always "bar").
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    /// Bar payload.
    pub bar: ClientBar,
}

/// Bar payload inside [`ClientBarFrame`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientBar {
    /// Epoch milliseconds.
    pub t: i64,
    /// Open.
    pub o: f64,
    /// High.
    pub h: f64,
    /// Low.
    pub l: f64,
    /// Close.
    pub c: f64,
    /// Volume.
    pub v: f64,
}

impl From<&Bar> for ClientBarFrame {
    fn from(bar: &Bar) -> Self {
        Self {
            frame_type: "bar",
            bar: ClientBar {
                t: bar.timestamp_ms,
                o: bar.open,
                h: bar.high,
                l: bar.low,
                c: bar.close,
                v: bar.volume,
            },
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the single upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live connection; waiting to (re)connect.
    #[default]
    Disconnected,
    /// Dialing the provider.
    Connecting,
    /// Auth command sent, waiting for the provider's verdict.
    AwaitingAuth,
    /// Authenticated and receiving bars.
    Streaming,
}

impl ConnectionState {
    /// Lowercase name for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Streaming => "streaming",
        }
    }

    /// Whether bars are currently flowing.
    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
