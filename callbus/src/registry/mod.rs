//! Service registry interface.
//!
//! The registry is a pure data source: it reports the live node set for a
//! named service and emits add/update/remove change events. Selection logic
//! lives entirely in the [`selector`](crate::selector) layer above it.

pub mod memory;

pub use memory::MemoryRegistry;

use crate::error::RegistryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A concrete service endpoint.
///
/// Owned by the registry; selectors and caches hold copies and never
/// mutate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Logical service name this node belongs to.
    pub service: String,
    /// Unique node id within the service.
    pub id: String,
    /// Bus address the node's RPC server listens on.
    pub address: String,
    /// Free-form metadata, used by selection filters.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Node {
    /// Convenience constructor without metadata.
    pub fn new(
        service: impl Into<String>,
        id: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            id: id.into(),
            address: address.into(),
            metadata: HashMap::new(),
        }
    }
}

/// The kind of change a watch event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A node joined the service.
    Added,
    /// An existing node changed address or metadata.
    Updated,
    /// A node left the service.
    Removed,
}

/// One incremental change to a service's node set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    /// What happened.
    pub kind: EventKind,
    /// The node it happened to.
    pub node: Node,
}

/// Read access to the live node set, plus change notification.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// The current nodes of a service. An unknown service yields an empty
    /// list, not an error.
    async fn list(&self, service: &str) -> Result<Vec<Node>, RegistryError>;

    /// Subscribe to incremental changes for a service. The stream ends when
    /// the registry drops the watcher.
    async fn watch(&self, service: &str)
        -> Result<mpsc::Receiver<RegistryEvent>, RegistryError>;
}
