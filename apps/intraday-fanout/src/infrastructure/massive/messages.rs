//! Massive WebSocket Message Types
//!
//! Wire shapes for the Massive (Polygon-compatible) stocks socket.
//!
//! # Inbound
//!
//! Frames carry either a single event object or an array of them. Every
//! event has an `ev` discriminator:
//!
//! ```json
//! [{"ev":"status","status":"auth_success","message":"authenticated"}]
//! [{"ev":"AM","sym":"AAPL","t":1700000000000,"o":10.0,"h":11.0,"l":9.0,"c":10.5,"v":500}]
//! ```
//!
//! # Outbound
//!
//! ```json
//! {"action":"auth","params":"<key>"}
//! {"action":"subscribe","params":"AM.AAPL,AM.MSFT"}
//! {"action":"unsubscribe","params":"AM.AAPL"}
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::auth::ApiKey;
use crate::domain::streaming::{Bar, Symbol};

/// Channel prefix for per-minute aggregates.
pub const MINUTE_AGGREGATE_PREFIX: &str = "AM.";

/// `ev` value of per-minute aggregate events.
pub const MINUTE_AGGREGATE_EVENT: &str = "AM";

/// `ev` value of status events.
pub const STATUS_EVENT: &str = "status";

// =============================================================================
// Inbound
// =============================================================================

/// A classified upstream message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// The provider accepted our credentials.
    AuthSuccess,
    /// The provider rejected our credentials.
    AuthFailure {
        /// Raw status value.
        status: String,
        /// Optional human-readable reason.
        message: Option<String>,
    },
    /// One minute bar.
    Bar(Bar),
    /// Anything else; ignored.
    Unrecognized,
}

impl FeedMessage {
    /// Classify a status event by its `status` text.
    ///
    /// Matching is case-insensitive: a status mentioning "auth" is a
    /// success unless it also mentions "fail".
    #[must_use]
    pub fn from_status(status: &str, message: Option<String>) -> Self {
        let lowered = status.to_lowercase();
        if !lowered.contains("auth") {
            return Self::Unrecognized;
        }
        if lowered.contains("fail") {
            Self::AuthFailure {
                status: status.to_string(),
                message,
            }
        } else {
            Self::AuthSuccess
        }
    }
}

/// Number that may arrive as a JSON number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Numeric {
    /// JSON number.
    Number(serde_json::Number),
    /// Numeric string such as `"10.5"`.
    Text(String),
}

impl Numeric {
    /// Value as a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Value as an integer, truncating any fraction.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
            Self::Text(s) => {
                let s = s.trim();
                s.parse()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
        }
    }
}

/// Raw per-minute aggregate (`ev == "AM"`).
///
/// Fields are optional so a missing field can be reported by name instead
/// of as a generic deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateMessage {
    /// Ticker.
    pub sym: Option<String>,
    /// Bar start, epoch ms.
    pub t: Option<Numeric>,
    /// Open.
    pub o: Option<Numeric>,
    /// High.
    pub h: Option<Numeric>,
    /// Low.
    pub l: Option<Numeric>,
    /// Close.
    pub c: Option<Numeric>,
    /// Volume.
    pub v: Option<Numeric>,
}

impl AggregateMessage {
    /// Validate and convert into a domain bar.
    ///
    /// Volume defaults to zero when absent.
    ///
    /// # Errors
    ///
    /// Returns the name of the first missing or non-numeric required field.
    pub fn into_bar(self) -> Result<Bar, &'static str> {
        let symbol = self
            .sym
            .as_deref()
            .map(Symbol::new)
            .filter(|s| !s.is_empty())
            .ok_or("sym")?;

        let price = |field: Option<&Numeric>, name: &'static str| {
            field.and_then(Numeric::as_f64).ok_or(name)
        };

        Ok(Bar {
            timestamp_ms: self.t.as_ref().and_then(Numeric::as_i64).ok_or("t")?,
            open: price(self.o.as_ref(), "o")?,
            high: price(self.h.as_ref(), "h")?,
            low: price(self.l.as_ref(), "l")?,
            close: price(self.c.as_ref(), "c")?,
            volume: match self.v {
                None => 0.0,
                Some(v) => v.as_f64().ok_or("v")?,
            },
            symbol,
        })
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Control action sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Authenticate.
    Auth,
    /// Add channels.
    Subscribe,
    /// Remove channels.
    Unsubscribe,
}

impl Action {
    /// Wire and metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Control command sent upstream.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ControlRequest {
    /// What to do.
    pub action: Action,
    /// API key for auth, comma-joined channels otherwise.
    pub params: String,
}

impl ControlRequest {
    /// Auth command.
    #[must_use]
    pub fn auth(key: &ApiKey) -> Self {
        Self {
            action: Action::Auth,
            params: key.expose().to_string(),
        }
    }

    /// Subscribe to minute aggregates for `symbols`.
    ///
    /// Returns `None` if `symbols` is empty.
    #[must_use]
    pub fn subscribe<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Option<Self> {
        Self::channels(Action::Subscribe, symbols)
    }

    /// Unsubscribe from minute aggregates for `symbols`.
    ///
    /// Returns `None` if `symbols` is empty.
    #[must_use]
    pub fn unsubscribe<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Option<Self> {
        Self::channels(Action::Unsubscribe, symbols)
    }

    fn channels<'a>(action: Action, symbols: impl IntoIterator<Item = &'a Symbol>) -> Option<Self> {
        let sorted: BTreeSet<&str> = symbols.into_iter().map(Symbol::as_str).collect();
        if sorted.is_empty() {
            return None;
        }

        let params = sorted
            .into_iter()
            .map(|s| format!("{MINUTE_AGGREGATE_PREFIX}{s}"))
            .collect::<Vec<_>>()
            .join(",");

        Some(Self { action, params })
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Debug for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = match self.action {
            Action::Auth => "[REDACTED]",
            Action::Subscribe | Action::Unsubscribe => self.params.as_str(),
        };
        f.debug_struct("ControlRequest")
            .field("action", &self.action)
            .field("params", &params)
            .finish()
    }
}
