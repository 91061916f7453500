//! Service sessions: a resolved node bound to an RPC client.
//!
//! A [`ServiceSession`] is the unit application code calls through. The
//! [`SessionHub`] owns the plumbing: it resolves a service name through the
//! selector, then hands out the cached session for the chosen node or
//! builds one on first contact.

use crate::codec::{CodecRegistry, Value};
use crate::config::RpcSettings;
use crate::error::RpcError;
use crate::registry::Node;
use crate::rpc::RpcClient;
use crate::selector::{SelectOptions, Selector};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A resolved node with a bound RPC client.
pub struct ServiceSession {
    service: String,
    node: RwLock<Node>,
    client: RpcClient,
}

impl ServiceSession {
    /// Bind a client to the node's address.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        codecs: Arc<CodecRegistry>,
        settings: RpcSettings,
        node: Node,
    ) -> Result<Self, RpcError> {
        let client =
            RpcClient::new(transport, codecs, settings, node.address.clone()).await?;
        Ok(Self {
            service: node.service.clone(),
            node: RwLock::new(node),
            client,
        })
    }

    /// The logical service this session belongs to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The bound node's id.
    pub fn id(&self) -> String {
        self.node.read().expect("node lock poisoned").id.clone()
    }

    /// A copy of the bound node.
    pub fn node(&self) -> Node {
        self.node.read().expect("node lock poisoned").clone()
    }

    /// Swap the bound node after a registry update. Future calls go to the
    /// new address; calls already in flight keep the old one.
    pub fn set_node(&self, node: Node) {
        self.client.set_target(node.address.clone());
        *self.node.write().expect("node lock poisoned") = node;
    }

    /// The underlying client, for budget inspection or direct use.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    /// Invoke a function on the bound node and wait for the result.
    pub async fn call(&self, fn_name: &str, params: &[Value]) -> Result<Value, RpcError> {
        self.client.call(fn_name, params).await
    }

    /// Fire-and-forget invoke.
    pub async fn call_nr(&self, fn_name: &str, params: &[Value]) -> Result<(), RpcError> {
        self.client.call_nr(fn_name, params).await
    }

    /// Invoke with pre-encoded arguments.
    pub async fn call_args(
        &self,
        fn_name: &str,
        args: Vec<(String, Vec<u8>)>,
    ) -> Result<Value, RpcError> {
        self.client.call_args(fn_name, args).await
    }

    /// Fire-and-forget with pre-encoded arguments.
    pub async fn call_nr_args(
        &self,
        fn_name: &str,
        args: Vec<(String, Vec<u8>)>,
    ) -> Result<(), RpcError> {
        self.client.call_nr_args(fn_name, args).await
    }

    /// Tear down the bound client, cancelling its pending calls.
    pub fn close(&self) -> Result<(), RpcError> {
        self.client.done()
    }
}

/// Routes service names to sessions, caching one session per node.
pub struct SessionHub {
    transport: Arc<dyn Transport>,
    codecs: Arc<CodecRegistry>,
    settings: RpcSettings,
    selector: Arc<dyn Selector>,
    sessions: tokio::sync::Mutex<HashMap<String, Arc<ServiceSession>>>,
}

impl SessionHub {
    /// Create a hub over the given transport, codecs, and selector.
    pub fn new(
        transport: Arc<dyn Transport>,
        codecs: Arc<CodecRegistry>,
        settings: RpcSettings,
        selector: Arc<dyn Selector>,
    ) -> Self {
        Self {
            transport,
            codecs,
            settings,
            selector,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a service and return a session bound to the chosen node.
    ///
    /// Sessions are cached per node; a repeat resolution to the same node
    /// reuses the existing client (refreshing its address if the node
    /// moved).
    pub async fn route(
        &self,
        service: &str,
        opts: SelectOptions,
    ) -> Result<Arc<ServiceSession>, RpcError> {
        let mut candidates = self.selector.select(service, opts).await?;
        let node = candidates.next()?;
        let key = format!("{service}@{}", node.id);

        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            if session.node() != node {
                session.set_node(node);
            }
            return Ok(session.clone());
        }

        let session = Arc::new(
            ServiceSession::connect(
                self.transport.clone(),
                self.codecs.clone(),
                self.settings.clone(),
                node,
            )
            .await?,
        );
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Number of cached sessions, for tests.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Tear down every cached session and the selector's background tasks.
    pub async fn close(&self) {
        let drained: Vec<Arc<ServiceSession>> =
            self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            if let Err(e) = session.close() {
                tracing::warn!(error = %e, "session close failed");
            }
        }
        self.selector.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, Node};
    use crate::selector::CacheSelector;
    use crate::transport::MemoryTransport;

    fn hub(registry: &MemoryRegistry, bus: &MemoryTransport) -> SessionHub {
        SessionHub::new(
            Arc::new(bus.clone()),
            Arc::new(CodecRegistry::new()),
            RpcSettings::default(),
            Arc::new(CacheSelector::new(Arc::new(registry.clone()))),
        )
    }

    #[tokio::test]
    async fn test_route_caches_session_per_node() {
        let registry = MemoryRegistry::new();
        registry.register(Node::new("svc", "n1", "addr.1"));
        let bus = MemoryTransport::new();
        let hub = hub(&registry, &bus);

        let first = hub.route("svc", SelectOptions::default()).await.unwrap();
        let second = hub.route("svc", SelectOptions::default()).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hub.session_count().await, 1);
        assert_eq!(first.id(), "n1");
        assert_eq!(first.service(), "svc");
    }

    #[tokio::test]
    async fn test_route_unknown_service_fails() {
        let registry = MemoryRegistry::new();
        let bus = MemoryTransport::new();
        let hub = hub(&registry, &bus);

        let result = hub.route("ghost", SelectOptions::default()).await;
        assert!(matches!(result, Err(RpcError::Selector(_))));
    }

    #[tokio::test]
    async fn test_set_node_redirects_future_calls() {
        let registry = MemoryRegistry::new();
        let bus = MemoryTransport::new();
        registry.register(Node::new("svc", "n1", "addr.old"));
        let hub = hub(&registry, &bus);

        let session = hub.route("svc", SelectOptions::default()).await.unwrap();
        assert_eq!(session.client().target(), "addr.old");

        session.set_node(Node::new("svc", "n1", "addr.new"));
        assert_eq!(session.client().target(), "addr.new");
        assert_eq!(session.node().address, "addr.new");
    }

    #[tokio::test]
    async fn test_close_tears_down_sessions() {
        let registry = MemoryRegistry::new();
        registry.register(Node::new("svc", "n1", "addr.1"));
        let bus = MemoryTransport::new();
        let hub = hub(&registry, &bus);

        let session = hub.route("svc", SelectOptions::default()).await.unwrap();
        hub.close().await;
        assert_eq!(hub.session_count().await, 0);
        assert!(matches!(
            session.call("F", &[]).await,
            Err(RpcError::Closed)
        ));
    }
}
