//! In-memory registry for tests and single-process deployments.

use crate::error::RegistryError;
use crate::registry::{EventKind, Node, Registry, RegistryEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Watch channel capacity. Events beyond a slow watcher's buffer drop the
/// watcher rather than block registration.
const WATCH_CAPACITY: usize = 64;

#[derive(Default)]
struct State {
    /// service → id → node
    nodes: HashMap<String, HashMap<String, Node>>,
    /// service → live watchers
    watchers: HashMap<String, Vec<mpsc::Sender<RegistryEvent>>>,
}

/// In-memory [`Registry`] with watch fan-out.
///
/// `list_calls` counts fetches and `set_failing` forces fetch errors, so
/// tests can observe cache behavior precisely.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
    list_calls: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a node, notifying watchers.
    pub fn register(&self, node: Node) {
        let event_kind = {
            let mut state = self.state.lock().expect("registry lock poisoned");
            let entry = state.nodes.entry(node.service.clone()).or_default();
            let kind = if entry.contains_key(&node.id) {
                EventKind::Updated
            } else {
                EventKind::Added
            };
            entry.insert(node.id.clone(), node.clone());
            kind
        };
        self.notify(RegistryEvent {
            kind: event_kind,
            node,
        });
    }

    /// Remove a node, notifying watchers. Unknown nodes are ignored.
    pub fn deregister(&self, service: &str, id: &str) {
        let removed = {
            let mut state = self.state.lock().expect("registry lock poisoned");
            state
                .nodes
                .get_mut(service)
                .and_then(|entry| entry.remove(id))
        };
        if let Some(node) = removed {
            self.notify(RegistryEvent {
                kind: EventKind::Removed,
                node,
            });
        }
    }

    /// Number of `list` fetches served so far.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Force subsequent `list` calls to fail, for cache fallback tests.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn notify(&self, event: RegistryEvent) {
        let mut state = self.state.lock().expect("registry lock poisoned");
        if let Some(watchers) = state.watchers.get_mut(&event.node.service) {
            watchers.retain(|tx| tx.try_send(event.clone()).is_ok());
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn list(&self, service: &str) -> Result<Vec<Node>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.load(Ordering::Relaxed) {
            return Err(RegistryError::Unavailable("forced failure".to_string()));
        }
        let state = self.state.lock().expect("registry lock poisoned");
        let mut nodes: Vec<Node> = state
            .nodes
            .get(service)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default();
        // Deterministic order for strategies and tests.
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn watch(
        &self,
        service: &str,
    ) -> Result<mpsc::Receiver<RegistryEvent>, RegistryError> {
        let (tx, rx) = mpsc::channel(WATCH_CAPACITY);
        let mut state = self.state.lock().expect("registry lock poisoned");
        state
            .watchers
            .entry(service.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_sorted_and_counted() {
        let registry = MemoryRegistry::new();
        registry.register(Node::new("svc", "b", "addr.b"));
        registry.register(Node::new("svc", "a", "addr.a"));

        let nodes = registry.list("svc").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "a");
        assert_eq!(registry.list_calls(), 1);

        assert!(registry.list("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_sees_changes() {
        let registry = MemoryRegistry::new();
        let mut events = registry.watch("svc").await.unwrap();

        let node = Node::new("svc", "n1", "addr.1");
        registry.register(node.clone());
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Added);
        assert_eq!(event.node, node);

        registry.register(node.clone());
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Updated);

        registry.deregister("svc", "n1");
        assert_eq!(events.recv().await.unwrap().kind, EventKind::Removed);
    }

    #[tokio::test]
    async fn test_forced_failure() {
        let registry = MemoryRegistry::new();
        registry.set_failing(true);
        assert!(registry.list("svc").await.is_err());
        registry.set_failing(false);
        assert!(registry.list("svc").await.is_ok());
    }
}
