//! Subscription Registry
//!
//! Tracks every channel path the caller wants to be subscribed to and
//! republishes them after a reconnect. Desired state is the source of
//! truth: the transport re-derives what to send from this registry on
//! every connect rather than trusting that incremental deltas survived a
//! restart.
//!
//! # ClientId scoping
//!
//! "Confirmed" means the server acknowledged a subscribe on the current
//! Bayeux clientId. Every handshake mints a new clientId, so a
//! confirmation from a previous socket lifetime is meaningless; entries
//! carry the clientId they were confirmed (and last sent) under, and
//! resync only skips entries already sent for the clientId at hand.
//! This makes the resync step idempotent: at most one subscribe per
//! entry per transport lifetime.

use std::collections::HashMap;

use parking_lot::RwLock;

/// State for one desired channel path.
#[derive(Debug, Default, Clone)]
struct SubscriptionEntry {
    /// Caller still wants this subscription.
    desired: bool,
    /// ClientId the server last acknowledged a subscribe under.
    confirmed_client_id: Option<String>,
    /// ClientId a subscribe was last sent under (ack may be pending).
    sent_client_id: Option<String>,
}

/// Registry of desired subscriptions keyed by channel path.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a channel path as desired.
    ///
    /// Returns `true` if the path was not already desired; callers use
    /// that to decide whether an immediate subscribe should be sent.
    pub fn mark_desired(&self, path: &str) -> bool {
        let mut entries = self.entries.write();
        let entry = entries.entry(path.to_string()).or_default();
        let newly = !entry.desired;
        entry.desired = true;
        newly
    }

    /// Drop desired and confirmed state for a path.
    ///
    /// Always clears, regardless of connectivity; the unsubscribe control
    /// message is the transport's business.
    pub fn revoke(&self, path: &str) {
        self.entries.write().remove(path);
    }

    /// Whether a path is currently desired.
    #[must_use]
    pub fn is_desired(&self, path: &str) -> bool {
        self.entries.read().get(path).is_some_and(|e| e.desired)
    }

    /// Record that a subscribe was sent under `client_id`.
    pub fn mark_sent(&self, path: &str, client_id: &str) {
        if let Some(entry) = self.entries.write().get_mut(path) {
            entry.sent_client_id = Some(client_id.to_string());
        }
    }

    /// Record a subscribe acknowledgment.
    ///
    /// `ack_client_id` is the clientId the acknowledgment arrived for;
    /// an ack not matching `current_client_id` is stale (superseded
    /// socket lifetime) and ignored. Returns `true` if the confirmation
    /// was applied.
    pub fn confirm(&self, path: &str, ack_client_id: &str, current_client_id: &str) -> bool {
        if ack_client_id != current_client_id {
            tracing::debug!(path, ack_client_id, "Ignoring stale subscribe ack");
            return false;
        }
        let mut entries = self.entries.write();
        match entries.get_mut(path) {
            Some(entry) if entry.desired => {
                entry.confirmed_client_id = Some(current_client_id.to_string());
                true
            }
            _ => false,
        }
    }

    /// Whether a path is confirmed under the given clientId.
    #[must_use]
    pub fn is_confirmed(&self, path: &str, client_id: &str) -> bool {
        self.entries
            .read()
            .get(path)
            .is_some_and(|e| e.confirmed_client_id.as_deref() == Some(client_id))
    }

    /// Channel paths that still need a subscribe under `client_id`.
    ///
    /// Desired entries neither sent nor confirmed under this clientId.
    /// Resending for an already-sent entry would be a protocol no-op but
    /// churns the server, so it is excluded here.
    #[must_use]
    pub fn pending_for(&self, client_id: &str) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| {
                e.desired
                    && e.sent_client_id.as_deref() != Some(client_id)
                    && e.confirmed_client_id.as_deref() != Some(client_id)
            })
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Number of desired subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| e.desired).count()
    }

    /// Whether no subscriptions are desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry (client teardown).
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
