//! The RPC client/server protocol.
//!
//! Calls travel as [`CallEnvelope`] frames to a server's unique address;
//! replies come back as [`ResultEnvelope`] frames to the client's unique
//! inbox, matched by correlation id. See [`client`] and [`server`] for the
//! two halves, [`stats`] for per-function execution counters, and
//! [`listener`] for the dispatch hooks exposed to the module layer.

pub mod client;
pub mod envelope;
pub mod handler;
pub mod listener;
pub mod server;
pub mod stats;

pub use client::RpcClient;
pub use envelope::{CallEnvelope, ResultEnvelope};
pub use handler::{DeferredHandler, FunctionInfo, Responder, SyncHandler};
pub use listener::RpcListener;
pub use server::RpcServer;
pub use stats::{parse_snapshot, MethodStats, StatisticalMethod};

/// Render a caught panic payload for logging.
pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
