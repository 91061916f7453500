//! Service selection: registry nodes → filters → strategy → candidates.
//!
//! The selector turns a logical service name into an iterable sequence of
//! concrete endpoints. [`RegistrySelector`] consults the registry on every
//! call; [`CacheSelector`] adds a TTL cache with watch-driven invalidation
//! and is what long-lived processes should use.

pub mod cache;
pub mod strategy;

pub use cache::CacheSelector;
pub use strategy::{NodeSequence, Strategy};

use crate::error::SelectorError;
use crate::registry::{Node, Registry};
use async_trait::async_trait;
use std::sync::Arc;

/// A node-list predicate applied before the strategy.
pub type Filter = Arc<dyn Fn(Vec<Node>) -> Vec<Node> + Send + Sync>;

/// Keep only nodes whose metadata has `key` equal to `value`.
pub fn filter_label(key: impl Into<String>, value: impl Into<String>) -> Filter {
    let key = key.into();
    let value = value.into();
    Arc::new(move |nodes: Vec<Node>| {
        nodes
            .into_iter()
            .filter(|node| node.metadata.get(&key) == Some(&value))
            .collect()
    })
}

/// Per-call selection options: an ordered filter chain and a strategy.
#[derive(Clone)]
pub struct SelectOptions {
    /// Filters applied in order; each may shrink the candidate list.
    pub filters: Vec<Filter>,
    /// The load-balancing strategy applied to whatever survives the filters.
    pub strategy: Strategy,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            strategy: Strategy::random(),
        }
    }
}

impl SelectOptions {
    /// Append a filter to the chain.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Resolves service names to candidate endpoint sequences.
#[async_trait]
pub trait Selector: Send + Sync + 'static {
    /// Resolve `service` to a sequence of candidate nodes.
    ///
    /// Fails with [`SelectorError::NoneAvailable`] when filtering leaves no
    /// nodes, or propagates the registry error when the fetch failed.
    async fn select(
        &self,
        service: &str,
        opts: SelectOptions,
    ) -> Result<NodeSequence, SelectorError>;

    /// Release any background resources. Default: nothing to release.
    async fn close(&self) {}
}

/// Shared tail of every selector: filter, check, apply strategy.
pub(crate) fn resolve(
    service: &str,
    mut nodes: Vec<Node>,
    opts: SelectOptions,
) -> Result<NodeSequence, SelectorError> {
    for filter in &opts.filters {
        nodes = filter(nodes);
    }
    if nodes.is_empty() {
        return Err(SelectorError::NoneAvailable(service.to_string()));
    }
    Ok(opts.strategy.apply(nodes))
}

/// Uncached selector: every `select` fetches from the registry.
pub struct RegistrySelector {
    registry: Arc<dyn Registry>,
}

impl RegistrySelector {
    /// Create a selector over the given registry.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Selector for RegistrySelector {
    async fn select(
        &self,
        service: &str,
        opts: SelectOptions,
    ) -> Result<NodeSequence, SelectorError> {
        let nodes = self.registry.list(service).await?;
        resolve(service, nodes, opts)
    }
}
