//! Caching selector with TTL expiry and watch-driven invalidation.
//!
//! The first selection for a service fetches its node list from the
//! registry and stores a snapshot with a TTL. A background watch task is
//! started (once per service) so that add/update/remove events evict the
//! snapshot immediately, bounding staleness far tighter than the raw TTL.
//!
//! When a registry fetch fails but any snapshot is present, even an expired
//! one, the stale snapshot is served with a warning: unreachable nodes
//! already surface as call timeouts, so briefly stale routing degrades more
//! gracefully than refusing every call during a registry outage. Selection
//! fails only when there is nothing to serve at all.

use crate::config::CacheSettings;
use crate::error::SelectorError;
use crate::registry::{Node, Registry};
use crate::selector::{resolve, NodeSequence, SelectOptions, Selector};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// One cached service snapshot.
struct CacheEntry {
    nodes: Vec<Node>,
    expires_at: Instant,
}

type EntryMap = Arc<Mutex<HashMap<String, CacheEntry>>>;
type WatchedSet = Arc<Mutex<HashSet<String>>>;

/// Selector wrapping a registry with a per-service node cache.
pub struct CacheSelector {
    registry: Arc<dyn Registry>,
    ttl: Duration,
    entries: EntryMap,
    watched: WatchedSet,
    shutdown: watch::Sender<bool>,
}

impl CacheSelector {
    /// Create a caching selector with the default TTL.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self::with_settings(registry, CacheSettings::default())
    }

    /// Create a caching selector with explicit cache settings.
    pub fn with_settings(registry: Arc<dyn Registry>, settings: CacheSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            ttl: settings.ttl(),
            entries: Arc::new(Mutex::new(HashMap::new())),
            watched: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Number of cached service entries, for tests.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    async fn cached_nodes(&self, service: &str) -> Result<Vec<Node>, SelectorError> {
        let fresh = {
            let entries = self.entries.lock().expect("cache lock poisoned");
            entries
                .get(service)
                .filter(|entry| entry.expires_at > Instant::now())
                .map(|entry| entry.nodes.clone())
        };
        if let Some(nodes) = fresh {
            return Ok(nodes);
        }

        match self.registry.list(service).await {
            Ok(nodes) => {
                {
                    let mut entries = self.entries.lock().expect("cache lock poisoned");
                    entries.insert(
                        service.to_string(),
                        CacheEntry {
                            nodes: nodes.clone(),
                            expires_at: Instant::now() + self.ttl,
                        },
                    );
                }
                self.ensure_watch(service);
                Ok(nodes)
            }
            Err(e) => {
                let stale = {
                    let entries = self.entries.lock().expect("cache lock poisoned");
                    entries.get(service).map(|entry| entry.nodes.clone())
                };
                match stale {
                    Some(nodes) => {
                        tracing::warn!(
                            service,
                            error = %e,
                            "registry fetch failed, serving stale node list"
                        );
                        Ok(nodes)
                    }
                    None => Err(SelectorError::Registry(e)),
                }
            }
        }
    }

    /// Start the watch task for a service unless one is already running.
    fn ensure_watch(&self, service: &str) {
        {
            let mut watched = self.watched.lock().expect("watched set lock poisoned");
            if !watched.insert(service.to_string()) {
                return;
            }
        }
        tokio::spawn(watch_loop(
            self.registry.clone(),
            self.entries.clone(),
            self.watched.clone(),
            service.to_string(),
            self.shutdown.subscribe(),
        ));
    }
}

#[async_trait]
impl Selector for CacheSelector {
    async fn select(
        &self,
        service: &str,
        opts: SelectOptions,
    ) -> Result<NodeSequence, SelectorError> {
        let nodes = self.cached_nodes(service).await?;
        resolve(service, nodes, opts)
    }

    /// Stop the watch tasks and drop every cached entry.
    async fn close(&self) {
        let _ = self.shutdown.send(true);
        self.entries.lock().expect("cache lock poisoned").clear();
    }
}

/// Supervised watch task: evicts the service's cache entry on every
/// registry change, exits on shutdown or when the event stream ends.
async fn watch_loop(
    registry: Arc<dyn Registry>,
    entries: EntryMap,
    watched: WatchedSet,
    service: String,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut events = match registry.watch(&service).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(service = %service, error = %e, "watch subscription failed");
            watched
                .lock()
                .expect("watched set lock poisoned")
                .remove(&service);
            return;
        }
    };

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                None => break,
                Some(event) => {
                    entries
                        .lock()
                        .expect("cache lock poisoned")
                        .remove(&service);
                    tracing::debug!(
                        service = %service,
                        kind = ?event.kind,
                        node = %event.node.id,
                        "registry change evicted cached nodes"
                    );
                }
            }
        }
    }
    watched
        .lock()
        .expect("watched set lock poisoned")
        .remove(&service);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::selector::Strategy;

    fn seeded() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry.register(Node::new("svc", "a", "addr.a"));
        registry.register(Node::new("svc", "b", "addr.b"));
        registry.register(Node::new("svc", "c", "addr.c"));
        registry
    }

    #[tokio::test]
    async fn test_second_select_hits_cache() {
        let registry = seeded();
        let selector = CacheSelector::new(Arc::new(registry.clone()));

        selector.select("svc", SelectOptions::default()).await.unwrap();
        selector.select("svc", SelectOptions::default()).await.unwrap();

        // Exactly one underlying fetch: the second select was a cache hit.
        assert_eq!(registry.list_calls(), 1);
        assert_eq!(selector.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_event_invalidates_before_ttl() {
        let registry = seeded();
        let selector = CacheSelector::new(Arc::new(registry.clone()));

        selector.select("svc", SelectOptions::default()).await.unwrap();
        assert_eq!(registry.list_calls(), 1);

        registry.register(Node::new("svc", "d", "addr.d"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(selector.entry_count(), 0);

        // The next select refetches and sees the new node.
        let opts = SelectOptions::default().with_strategy(Strategy::round_robin());
        let mut seq = selector.select("svc", opts).await.unwrap();
        assert_eq!(registry.list_calls(), 2);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(seq.next().unwrap().id);
        }
        assert!(seen.contains(&"d".to_string()));
    }

    #[tokio::test]
    async fn test_round_robin_cycle_through_cache() {
        let registry = seeded();
        let selector = CacheSelector::new(Arc::new(registry));

        let opts = SelectOptions::default().with_strategy(Strategy::round_robin());
        let mut seq = selector.select("svc", opts).await.unwrap();
        let pulled: Vec<String> = (0..4).map(|_| seq.next().unwrap().id).collect();
        assert_eq!(pulled, ["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_stale_served_on_fetch_error() {
        let registry = seeded();
        // Zero TTL: every select refetches, so the snapshot is always stale.
        let selector = CacheSelector::with_settings(
            Arc::new(registry.clone()),
            CacheSettings { ttl_secs: 0 },
        );

        selector.select("svc", SelectOptions::default()).await.unwrap();

        registry.set_failing(true);
        let mut seq = selector
            .select("svc", SelectOptions::default())
            .await
            .expect("stale snapshot should serve");
        assert!(seq.next().is_ok());
    }

    #[tokio::test]
    async fn test_fetch_error_with_nothing_cached_fails() {
        let registry = MemoryRegistry::new();
        registry.set_failing(true);
        let selector = CacheSelector::new(Arc::new(registry));

        let result = selector.select("svc", SelectOptions::default()).await;
        assert!(matches!(result, Err(SelectorError::Registry(_))));
    }

    #[tokio::test]
    async fn test_close_stops_watch_and_clears() {
        let registry = seeded();
        let selector = CacheSelector::new(Arc::new(registry.clone()));
        selector.select("svc", SelectOptions::default()).await.unwrap();

        selector.close().await;
        assert_eq!(selector.entry_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        // The watch task exited; a new event no longer touches the cache.
        registry.register(Node::new("svc", "e", "addr.e"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(selector.entry_count(), 0);
    }
}
