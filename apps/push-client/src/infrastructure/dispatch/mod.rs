//! Event Dispatcher
//!
//! Thin pub/sub keyed by exact channel path. The transport hands every
//! inbound application message here; listeners registered for that exact
//! path receive the payload in registration order. No pattern matching:
//! `/quotes/1,2` and `/quotes/1` are different keys.
//!
//! Removal is by listener id, so unsubscribing drops exactly the
//! caller-supplied listener and leaves others on the same path untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A registered listener callback.
pub type Listener = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

/// Identifier handed back on registration, used for exact removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Channel-path keyed listener table.
#[derive(Default)]
pub struct Dispatcher {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for an exact channel path.
    pub fn add(&self, path: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(path.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove exactly one listener from a path.
    ///
    /// Returns `true` if the listener was present. Other listeners on the
    /// same path are untouched; an empty path entry is dropped.
    pub fn remove(&self, path: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(path) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            listeners.remove(path);
        }
        removed
    }

    /// Number of listeners registered for a path.
    #[must_use]
    pub fn listener_count(&self, path: &str) -> usize {
        self.listeners.read().get(path).map_or(0, Vec::len)
    }

    /// Whether any listener remains for a path.
    #[must_use]
    pub fn has_listeners(&self, path: &str) -> bool {
        self.listener_count(path) > 0
    }

    /// Deliver a payload to every listener on an exact path.
    ///
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, path: &str, payload: &serde_json::Value) -> usize {
        // Clone the listener list out of the lock so callbacks can
        // re-enter the dispatcher (e.g. unsubscribe from within).
        let targets: Vec<Listener> = self
            .listeners
            .read()
            .get(path)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &targets {
            listener(payload);
        }
        targets.len()
    }

    /// Drop every listener (client teardown).
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("Dispatcher")
            .field("paths", &listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_listener(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_registered_listener() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.add("/quotes/1", counter_listener(&hits));

        let delivered = dispatcher.dispatch("/quotes/1", &serde_json::json!({"p": 1.0}));
        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exact_match_only() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.add("/quotes/1,2", counter_listener(&hits));

        assert_eq!(dispatcher.dispatch("/quotes/1", &serde_json::json!({})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn multiple_listeners_per_path() {
        let dispatcher = Dispatcher::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        dispatcher.add("/quotes/1", counter_listener(&a));
        dispatcher.add("/quotes/1", counter_listener(&b));

        assert_eq!(dispatcher.dispatch("/quotes/1", &serde_json::json!({})), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_drops_exactly_one_listener() {
        let dispatcher = Dispatcher::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let id_a = dispatcher.add("/quotes/1", counter_listener(&a));
        dispatcher.add("/quotes/1", counter_listener(&b));

        assert!(dispatcher.remove("/quotes/1", id_a));
        dispatcher.dispatch("/quotes/1", &serde_json::json!({}));

        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count("/quotes/1"), 1);
    }

    #[test]
    fn remove_unknown_listener_is_false() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = dispatcher.add("/quotes/1", counter_listener(&hits));

        assert!(!dispatcher.remove("/quotes/2", id));
        assert!(dispatcher.remove("/quotes/1", id));
        assert!(!dispatcher.remove("/quotes/1", id));
    }

    #[test]
    fn empty_path_entry_is_dropped() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = dispatcher.add("/quotes/1", counter_listener(&hits));
        dispatcher.remove("/quotes/1", id);
        assert!(!dispatcher.has_listeners("/quotes/1"));
    }

    #[test]
    fn listener_can_remove_itself_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let d = Arc::clone(&dispatcher);
        let h = Arc::clone(&hits);
        let id_holder = Arc::new(RwLock::new(None::<ListenerId>));
        let holder = Arc::clone(&id_holder);
        let id = dispatcher.add(
            "/quotes/1",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *holder.read() {
                    d.remove("/quotes/1", id);
                }
            }),
        );
        *id_holder.write() = Some(id);

        dispatcher.dispatch("/quotes/1", &serde_json::json!({}));
        dispatcher.dispatch("/quotes/1", &serde_json::json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let dispatcher = Dispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.add("/quotes/1", counter_listener(&hits));
        dispatcher.clear();
        assert_eq!(dispatcher.dispatch("/quotes/1", &serde_json::json!({})), 0);
    }
}
