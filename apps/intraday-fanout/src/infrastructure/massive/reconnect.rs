//! Reconnection Policy
//!
//! Stepped backoff for the upstream WebSocket. Each failed attempt advances
//! one step through a fixed schedule; once the schedule is exhausted its
//! last delay repeats forever. The policy resets when a connection reaches
//! the streaming state.

use std::time::Duration;

use rand::Rng;

/// Default backoff schedule: 0.5 s, 1.5 s, then 3 s forever.
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1500),
    Duration::from_millis(3000),
];

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay for attempt N is `delays[min(N, len - 1)]`.
    pub delays: Vec<Duration>,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS.to_vec(),
            jitter_factor: 0.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a configuration with a custom schedule and no jitter.
    ///
    /// An empty schedule falls back to [`DEFAULT_DELAYS`].
    #[must_use]
    pub fn new(delays: Vec<Duration>) -> Self {
        let delays = if delays.is_empty() {
            DEFAULT_DELAYS.to_vec()
        } else {
            delays
        };
        Self {
            delays,
            jitter_factor: 0.0,
        }
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`.
    ///
    /// Non-finite values disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = if jitter_factor.is_finite() {
            jitter_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }
}

/// Reconnection policy walking a stepped delay schedule.
///
/// # Example
///
/// ```rust
/// use intraday_fanout::infrastructure::massive::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Duration::from_millis(500));
/// assert_eq!(policy.next_delay(), Duration::from_millis(1500));
/// assert_eq!(policy.next_delay(), Duration::from_millis(3000));
/// assert_eq!(policy.next_delay(), Duration::from_millis(3000));
///
/// // Connection reached streaming
/// policy.reset();
/// assert_eq!(policy.next_delay(), Duration::from_millis(500));
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt. Never gives up.
    pub fn next_delay(&mut self) -> Duration {
        let step = usize::try_from(self.attempt_count).unwrap_or(usize::MAX);
        let base = self
            .config
            .delays
            .get(step)
            .or_else(|| self.config.delays.last())
            .copied()
            .unwrap_or(DEFAULT_DELAYS[0]);

        self.attempt_count = self.attempt_count.saturating_add(1);
        self.apply_jitter(base)
    }

    /// Reset the policy after a connection reaches streaming.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        // Field is public; a literal can bypass the builder clamp
        if !self.config.jitter_factor.is_finite() || self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
