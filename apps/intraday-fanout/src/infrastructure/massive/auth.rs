//! Massive WebSocket Authentication
//!
//! The Massive stocks socket expects an auth command immediately after the
//! connection opens and answers with a status event.
//!
//! # Authentication Flow
//!
//! 1. Connect to the WebSocket endpoint
//! 2. Optionally receive `{"ev":"status","status":"connected",...}`
//! 3. Send `{"action":"auth","params":"<api key>"}`
//! 4. Receive `{"ev":"status","status":"auth_success",...}` or
//!    `{"ev":"status","status":"auth_failed",...}`
//!
//! The connection is dropped and retried if no verdict arrives within
//! [`AUTH_TIMEOUT`].

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::messages::{ControlRequest, FeedMessage};

// =============================================================================
// Constants
// =============================================================================

/// Maximum time to wait for the auth verdict after sending credentials.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No API key was configured.
    #[error("API key cannot be empty")]
    MissingKey,

    /// The provider rejected the credentials.
    #[error("authentication rejected ({status}): {message}")]
    Rejected {
        /// Status string from the provider.
        status: String,
        /// Human-readable reason, if any.
        message: String,
    },

    /// No verdict arrived in time.
    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),
}

// =============================================================================
// API Key
// =============================================================================

/// Massive API key.
///
/// `Debug` and `Display` never print the key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingKey`] if the key is empty or whitespace.
    pub fn new(raw: impl Into<String>) -> Result<Self, AuthError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AuthError::MissingKey);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The raw key, for building the auth command.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

// =============================================================================
// Authentication Handshake
// =============================================================================

/// Per-connection authentication step.
///
/// # Example
///
/// ```rust
/// use intraday_fanout::infrastructure::massive::auth::{ApiKey, AuthHandshake};
/// use intraday_fanout::infrastructure::massive::messages::FeedMessage;
///
/// let handshake = AuthHandshake::new(ApiKey::new("secret").unwrap());
/// let request = handshake.request();
/// assert_eq!(request.to_json().unwrap(), r#"{"action":"auth","params":"secret"}"#);
///
/// assert_eq!(handshake.verdict(&FeedMessage::AuthSuccess), Some(Ok(())));
/// assert_eq!(handshake.verdict(&FeedMessage::Unrecognized), None);
/// ```
#[derive(Debug, Clone)]
pub struct AuthHandshake {
    key: ApiKey,
}

impl AuthHandshake {
    /// Create a handshake for `key`.
    #[must_use]
    pub const fn new(key: ApiKey) -> Self {
        Self { key }
    }

    /// The auth command to send right after connecting.
    #[must_use]
    pub fn request(&self) -> ControlRequest {
        ControlRequest::auth(&self.key)
    }

    /// Interpret an inbound message while waiting for the verdict.
    ///
    /// Returns `None` for messages that say nothing about auth.
    #[must_use]
    pub fn verdict(&self, message: &FeedMessage) -> Option<Result<(), AuthError>> {
        match message {
            FeedMessage::AuthSuccess => Some(Ok(())),
            FeedMessage::AuthFailure { status, message } => Some(Err(AuthError::Rejected {
                status: status.clone(),
                message: message.clone().unwrap_or_default(),
            })),
            FeedMessage::Bar(_) | FeedMessage::Unrecognized => None,
        }
    }
}
