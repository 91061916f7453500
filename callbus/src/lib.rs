//! # callbus
//!
//! Inter-service call substrate for distributed applications: independent
//! service modules, possibly on different hosts, invoke each other's
//! registered functions as if local, with results delivered asynchronously
//! over a message bus under explicit timeout budgets.
//!
//! ## Architecture
//!
//! ```text
//! application code
//!       │
//!       ▼
//! ┌──────────────┐   select    ┌──────────────┐   list/watch   ┌──────────┐
//! │ SessionHub / │ ──────────► │   Selector   │ ─────────────► │ Registry │
//! │ServiceSession│             │ (+ cache)    │                └──────────┘
//! └──────┬───────┘             └──────────────┘
//!        │ call
//!        ▼
//! ┌──────────────┐  CallEnvelope   ┌──────────────┐
//! │  RpcClient   │ ──────bus─────► │  RpcServer   │──► handler
//! │ (pending     │ ◄─────bus────── │ (dispatch,   │
//! │  table)      │  ResultEnvelope │  statistics) │
//! └──────────────┘                 └──────────────┘
//! ```
//!
//! Arguments cross the wire as `(type tag, bytes)` pairs through the
//! [`codec::CodecRegistry`]; the bus itself is abstracted behind
//! [`transport::Transport`] with best-effort, non-durable delivery. Lost
//! messages surface as call timeouts, never as retries.
//!
//! ## Quick start
//!
//! ```ignore
//! use callbus::prelude::*;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(MemoryTransport::new());
//! let codecs = Arc::new(CodecRegistry::new());
//! let registry = Arc::new(MemoryRegistry::new());
//!
//! // Server side: register handlers, announce the address.
//! let server = RpcServer::new(bus.clone(), codecs.clone(), RpcSettings::default()).await?;
//! server.register("Echo", |mut args: Vec<Value>| {
//!     args.pop().ok_or_else(|| "missing argument".to_string())
//! });
//! registry.register(Node::new("echo-svc", "node-1", server.addr()));
//!
//! // Client side: resolve and call.
//! let hub = SessionHub::new(
//!     bus,
//!     codecs,
//!     RpcSettings::default(),
//!     Arc::new(CacheSelector::new(registry)),
//! );
//! let session = hub.route("echo-svc", SelectOptions::default()).await?;
//! let reply = session.call("Echo", &[Value::from("hello")]).await?;
//! ```

#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod registry;
pub mod rpc;
pub mod selector;
pub mod session;
pub mod transport;

/// Commonly used types, re-exported for convenient wildcard import.
pub mod prelude {
    pub use crate::codec::{CodecRegistry, ExtCodec, Value};
    pub use crate::config::{CacheSettings, RpcSettings};
    pub use crate::error::{
        CodecError, RegistryError, RpcError, SelectorError, TransportError,
    };
    pub use crate::registry::{
        EventKind, MemoryRegistry, Node, Registry, RegistryEvent,
    };
    pub use crate::rpc::{
        CallEnvelope, FunctionInfo, Responder, ResultEnvelope, RpcClient,
        RpcListener, RpcServer, StatisticalMethod,
    };
    pub use crate::selector::{
        filter_label, CacheSelector, NodeSequence, RegistrySelector,
        SelectOptions, Selector, Strategy,
    };
    pub use crate::session::{ServiceSession, SessionHub};
    pub use crate::transport::{new_inbox, MemoryTransport, Subscription, Transport};
}
