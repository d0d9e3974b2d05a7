//! Subscription Service
//!
//! Wraps the registry and turns its active-set transitions into upstream
//! commands. Every path that adds or removes a session goes through here,
//! so explicit unregistration and eviction behave identically.

use std::collections::BTreeSet;

use crate::application::ports::{SharedSession, UpstreamCommand, UpstreamCommands};
use crate::domain::streaming::Symbol;
use crate::domain::subscription::{RegistryStats, SessionId, SubscriptionRegistry};

/// Registry plus the command channel it feeds.
pub struct SubscriptionService {
    registry: SubscriptionRegistry<SharedSession>,
    commands: UpstreamCommands,
}

impl SubscriptionService {
    /// Create a service sending upstream changes to `commands`.
    #[must_use]
    pub fn new(commands: UpstreamCommands) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            commands,
        }
    }

    /// Register `session` for `symbol`.
    ///
    /// Returns `true` if the symbol just became active; a subscribe command
    /// has then been queued.
    pub fn subscribe(&self, symbol: &Symbol, session: SharedSession) -> bool {
        let id = session.id();
        let became_active = self.registry.add_subscriber(symbol, id, session);

        tracing::debug!(%symbol, session_id = %id, became_active, "Session subscribed");

        if became_active {
            self.commands.send(UpstreamCommand::Subscribe(symbol.clone()));
        }
        became_active
    }

    /// Remove `id` from `symbol`.
    ///
    /// Returns `true` if the symbol just became inactive; an unsubscribe
    /// command has then been queued.
    pub fn unsubscribe(&self, symbol: &Symbol, id: SessionId) -> bool {
        self.evict(symbol, &[id])
    }

    /// Remove several sessions from `symbol` at once.
    ///
    /// Returns `true` if the symbol just became inactive.
    pub fn evict(&self, symbol: &Symbol, ids: &[SessionId]) -> bool {
        let became_inactive = self.registry.remove_subscribers(symbol, ids);

        tracing::debug!(%symbol, removed = ids.len(), became_inactive, "Sessions unsubscribed");

        if became_inactive {
            self.commands
                .send(UpstreamCommand::Unsubscribe(symbol.clone()));
        }
        became_inactive
    }

    /// Sessions currently watching `symbol`.
    #[must_use]
    pub fn subscribers_for(&self, symbol: &Symbol) -> Vec<(SessionId, SharedSession)> {
        self.registry.subscribers_for(symbol)
    }

    /// Sorted copy of the active symbol set.
    #[must_use]
    pub fn active_symbols(&self) -> BTreeSet<Symbol> {
        self.registry.snapshot()
    }

    /// Whether `symbol` has at least one subscriber.
    #[must_use]
    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.registry.is_active(symbol)
    }

    /// Registry counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}
