//! Fanout Dispatcher
//!
//! Pushes each decoded bar to every session subscribed to its symbol.
//! Deliveries run concurrently, each bounded by a timeout. Sessions that
//! fail are evicted after the pass through [`SubscriptionService::evict`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;

use super::subscription::SubscriptionService;
use crate::application::ports::SessionError;
use crate::domain::streaming::Bar;
use crate::domain::subscription::SessionId;

/// Default bound on a single session delivery.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Sessions that accepted the frame.
    pub delivered: usize,
    /// Sessions removed because delivery failed.
    pub evicted: usize,
    /// Whether eviction left the symbol without subscribers.
    pub symbol_deactivated: bool,
}

/// Delivers bars to subscribed sessions.
#[derive(Clone)]
pub struct FanoutDispatcher {
    subscriptions: Arc<SubscriptionService>,
    delivery_timeout: Duration,
}

impl FanoutDispatcher {
    /// Create a dispatcher reading subscribers from `subscriptions`.
    #[must_use]
    pub const fn new(subscriptions: Arc<SubscriptionService>, delivery_timeout: Duration) -> Self {
        Self {
            subscriptions,
            delivery_timeout,
        }
    }

    /// Deliver `bar` to every session watching its symbol.
    ///
    /// A bar nobody watches is discarded. Never fails: per-session errors
    /// lead to eviction of that session only.
    pub async fn dispatch(&self, bar: &Bar) -> DispatchOutcome {
        let sessions = self.subscriptions.subscribers_for(&bar.symbol);
        if sessions.is_empty() {
            tracing::trace!(symbol = %bar.symbol, "No subscribers for bar");
            return DispatchOutcome::default();
        }

        let frame = match bar.to_client_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(symbol = %bar.symbol, error = %e, "Failed to encode bar");
                return DispatchOutcome::default();
            }
        };

        let deliveries = sessions.iter().map(|(id, session)| {
            let frame = frame.as_str();
            async move {
                let send =
                    AssertUnwindSafe(async move { session.send_text(frame).await }).catch_unwind();
                let result = match tokio::time::timeout(self.delivery_timeout, send).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(panic)) => Err(SessionError::Panicked(panic_message(panic.as_ref()))),
                    Err(_) => Err(SessionError::Timeout),
                };
                (*id, result)
            }
        });

        let mut failed: Vec<SessionId> = Vec::new();
        for (id, result) in join_all(deliveries).await {
            if let Err(e) = result {
                tracing::info!(symbol = %bar.symbol, session_id = %id, error = %e, "Evicting session");
                failed.push(id);
            }
        }

        let symbol_deactivated = !failed.is_empty() && self.subscriptions.evict(&bar.symbol, &failed);

        DispatchOutcome {
            delivered: sessions.len() - failed.len(),
            evicted: failed.len(),
            symbol_deactivated,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic.downcast_ref::<&str>().map_or_else(
        || {
            panic.downcast_ref::<String>().map_or_else(
                || "unknown panic".to_string(),
                std::string::ToString::to_string,
            )
        },
        std::string::ToString::to_string,
    )
}
