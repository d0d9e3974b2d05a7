//! Subscription Management Types
//!
//! Domain types for tracking which chart sessions watch which symbols.
//!
//! # Design
//!
//! The registry maps each symbol to the set of sessions interested in it.
//! A symbol key exists exactly while at least one session references it,
//! so the key set *is* the set of symbols that must be subscribed upstream.
//! Add/remove report the empty↔non-empty transitions so the caller knows
//! when an upstream subscribe or unsubscribe is needed.
//!
//! All state sits behind one lock that is only held for in-memory work.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a downstream client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe symbol → subscriber-set bookkeeping.
///
/// `S` is the session handle stored for delivery; the registry only needs to
/// clone it when handing out snapshots.
///
/// # Example
///
/// ```rust
/// use intraday_fanout::domain::streaming::Symbol;
/// use intraday_fanout::domain::subscription::{SessionId, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
/// let aapl = Symbol::new("aapl");
/// let (s1, s2) = (SessionId::new(), SessionId::new());
///
/// // First subscriber activates the symbol
/// assert!(registry.add_subscriber(&aapl, s1, "tab-1"));
/// // Second subscriber does not
/// assert!(!registry.add_subscriber(&aapl, s2, "tab-2"));
///
/// // Removing a non-last subscriber keeps it active
/// assert!(!registry.remove_subscriber(&aapl, s1));
/// // Removing the last one deactivates it
/// assert!(registry.remove_subscriber(&aapl, s2));
/// assert!(registry.snapshot().is_empty());
/// ```
pub struct SubscriptionRegistry<S> {
    subscribers: RwLock<HashMap<Symbol, HashMap<SessionId, S>>>,
}

impl<S> Default for SubscriptionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SubscriptionRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Record `session` as interested in `symbol`.
    ///
    /// Returns `true` iff the symbol had no subscribers before this call,
    /// i.e. it must now be subscribed upstream. Registering the same session
    /// twice is a no-op that returns `false`.
    pub fn add_subscriber(&self, symbol: &Symbol, id: SessionId, session: S) -> bool {
        let mut subscribers = self.subscribers.write();
        let sessions = subscribers.entry(symbol.clone()).or_default();
        let became_active = sessions.is_empty();
        sessions.entry(id).or_insert(session);
        became_active
    }

    /// Remove `id` from `symbol`'s subscribers.
    ///
    /// Returns `true` iff this call removed the last subscriber; the symbol
    /// entry is deleted in the same critical section. Unknown symbols or
    /// sessions return `false`.
    pub fn remove_subscriber(&self, symbol: &Symbol, id: SessionId) -> bool {
        self.remove_subscribers(symbol, &[id])
    }

    /// Remove several sessions from one symbol under a single lock.
    ///
    /// Returns `true` iff the symbol became inactive as a result.
    pub fn remove_subscribers(&self, symbol: &Symbol, ids: &[SessionId]) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(sessions) = subscribers.get_mut(symbol) else {
            return false;
        };

        let before = sessions.len();
        for id in ids {
            sessions.remove(id);
        }

        if sessions.is_empty() {
            subscribers.remove(symbol);
            return before > 0;
        }

        false
    }

    /// Copy of the active symbol set, sorted ascending.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<Symbol> {
        self.subscribers.read().keys().cloned().collect()
    }

    /// Whether `symbol` currently has at least one subscriber.
    #[must_use]
    pub fn is_active(&self, symbol: &Symbol) -> bool {
        self.subscribers.read().contains_key(symbol)
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let subscribers = self.subscribers.read();
        RegistryStats {
            symbol_count: subscribers.len(),
            session_count: subscribers.values().map(HashMap::len).sum(),
        }
    }
}

impl<S: Clone> SubscriptionRegistry<S> {
    /// Copy of the sessions currently subscribed to `symbol`.
    ///
    /// Exact match only. The returned list is detached from the registry, so
    /// concurrent removals do not affect an in-flight delivery pass.
    #[must_use]
    pub fn subscribers_for(&self, symbol: &Symbol) -> Vec<(SessionId, S)> {
        self.subscribers
            .read()
            .get(symbol)
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|(id, session)| (*id, session.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry size at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of active symbols.
    pub symbol_count: usize,
    /// Number of (symbol, session) registrations.
    pub session_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
