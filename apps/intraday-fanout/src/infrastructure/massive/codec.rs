//! Stream Codec Module
//!
//! Decodes Massive text frames into [`FeedMessage`]s.
//!
//! A frame is either one event object or an array of them. Frame-level
//! problems (invalid JSON, a scalar at the top level) are returned as
//! [`CodecError`]; element-level problems drop only that element. Neither
//! ever tears down the connection.

use serde_json::Value;

use super::messages::{AggregateMessage, FeedMessage, MINUTE_AGGREGATE_EVENT, STATUS_EVENT};
use crate::infrastructure::metrics::{self, DropReason};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Value has the wrong JSON shape.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Aggregate event missing a required field.
    #[error("malformed bar: missing or invalid `{0}`")]
    MalformedBar(&'static str),
}

impl CodecError {
    /// Metric label for the drop.
    #[must_use]
    pub const fn drop_reason(&self) -> DropReason {
        match self {
            Self::Json(_) => DropReason::InvalidJson,
            Self::InvalidFormat(_) => DropReason::InvalidFormat,
            Self::MalformedBar(_) => DropReason::MalformedBar,
        }
    }
}

/// JSON codec for the Massive stocks socket.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Elements that fail to decode are logged, counted, and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or is neither an object
    /// nor an array.
    pub fn decode(&self, text: &str) -> Result<Vec<FeedMessage>, CodecError> {
        let value: Value = serde_json::from_str(text)?;

        let elements = match value {
            Value::Array(items) => items,
            Value::Object(_) => vec![value],
            other => {
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let mut messages = Vec::with_capacity(elements.len());
        for element in elements {
            match self.decode_value(element) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping upstream message");
                    metrics::record_message_dropped(e.drop_reason());
                }
            }
        }

        Ok(messages)
    }

    /// Classify a single event object.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not an object or is a malformed
    /// aggregate event.
    pub fn decode_value(&self, value: Value) -> Result<FeedMessage, CodecError> {
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected event object, got {}",
                json_kind(&value)
            )));
        }

        match value.get("ev").and_then(Value::as_str) {
            Some(STATUS_EVENT) => {
                let status = match value.get("status") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(FeedMessage::from_status(&status, message))
            }
            Some(MINUTE_AGGREGATE_EVENT) => {
                let raw: AggregateMessage = serde_json::from_value(value)
                    .map_err(|_| CodecError::MalformedBar("numeric field"))?;
                raw.into_bar()
                    .map(FeedMessage::Bar)
                    .map_err(CodecError::MalformedBar)
            }
            _ => Ok(FeedMessage::Unrecognized),
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
