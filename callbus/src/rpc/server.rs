//! RPC server: dispatches inbound calls to registered handlers and replies.
//!
//! # Dispatch
//!
//! One listener task per server drains the inbound subscription. Every
//! decoded call is handled on its own spawned task, bounded by a semaphore
//! sized from [`RpcSettings::max_dispatch`], so a slow handler never stalls
//! the dispatch loop and a burst cannot spawn without limit.
//!
//! Per inbound call the state machine is
//!
//! ```text
//! Received → Dispatching → { Completed | Failed | NotFound }
//! ```
//!
//! with the three terminal states mutually exclusive, and exactly one
//! `ResultEnvelope` published per call that wants a reply. Handler panics
//! are caught, logged, and converted into failure results; the dispatch
//! loop survives them.

use crate::codec::{CodecRegistry, Value};
use crate::config::RpcSettings;
use crate::error::RpcError;
use crate::rpc::envelope::{self, CallEnvelope, ResultEnvelope};
use crate::rpc::handler::{
    DeferredHandler, FunctionInfo, Responder, SyncHandler, RESPONDER_DROPPED,
};
use crate::rpc::listener::RpcListener;
use crate::rpc::panic_message;
use crate::rpc::stats::{MethodStats, StatisticalMethod};
use crate::transport::{new_inbox, Subscription, Transport};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};

/// Server half of the RPC protocol, listening on one unique address.
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    transport: Arc<dyn Transport>,
    codecs: Arc<CodecRegistry>,
    addr: String,
    handlers: RwLock<HashMap<String, FunctionInfo>>,
    listener: Mutex<Option<Arc<dyn RpcListener>>>,
    stats: MethodStats,
    limiter: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl RpcServer {
    /// Create a server listening on a freshly generated unique address.
    pub async fn new(
        transport: Arc<dyn Transport>,
        codecs: Arc<CodecRegistry>,
        settings: RpcSettings,
    ) -> Result<Self, RpcError> {
        Self::listen(transport, codecs, settings, new_inbox()).await
    }

    /// Create a server listening on a caller-chosen address.
    pub async fn listen(
        transport: Arc<dyn Transport>,
        codecs: Arc<CodecRegistry>,
        settings: RpcSettings,
        addr: impl Into<String>,
    ) -> Result<Self, RpcError> {
        let addr = addr.into();
        let sub = transport.subscribe(&addr).await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(ServerInner {
            transport,
            codecs,
            addr,
            handlers: RwLock::new(HashMap::new()),
            listener: Mutex::new(None),
            stats: MethodStats::new(),
            limiter: Arc::new(Semaphore::new(settings.max_dispatch.max(1))),
            shutdown,
        });
        tokio::spawn(dispatch_loop(inner.clone(), sub, shutdown_rx));
        Ok(Self { inner })
    }

    /// The address this server receives calls on.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Register a synchronous handler. Replaces (with a warning) any
    /// handler already registered under the name.
    pub fn register(&self, name: &str, handler: impl SyncHandler) {
        self.insert(name, FunctionInfo::sync(handler));
    }

    /// Register a deferred handler that completes through its [`Responder`],
    /// possibly from another task. Use this for long-running work.
    pub fn register_go(&self, name: &str, handler: impl DeferredHandler) {
        self.insert(name, FunctionInfo::deferred(handler));
    }

    fn insert(&self, name: &str, info: FunctionInfo) {
        let mut handlers = self.inner.handlers.write().expect("handler table lock poisoned");
        if handlers.insert(name.to_string(), info).is_some() {
            tracing::warn!(func = name, "replacing registered handler");
        }
    }

    /// Install the dispatch hooks.
    pub fn set_listener(&self, listener: Arc<dyn RpcListener>) {
        *self.inner.listener.lock().expect("listener lock poisoned") = Some(listener);
    }

    /// A snapshot of the per-function statistics. Stamps the window end
    /// time; counters are never reset.
    pub fn statistics(&self) -> HashMap<String, StatisticalMethod> {
        self.inner.stats.snapshot()
    }

    /// The statistics snapshot as JSON.
    pub fn statistics_json(&self) -> Result<String, serde_json::Error> {
        self.inner.stats.to_json()
    }

    /// Shut down the server: the dispatch loop exits and the address is
    /// released. In-flight handlers run to completion. Idempotent.
    pub fn done(&self) -> Result<(), RpcError> {
        let _ = self.inner.shutdown.send(true);
        Ok(())
    }
}

/// Inbound listener: one per server, runs until shutdown. Undecodable
/// frames are logged and skipped; they never terminate the loop.
async fn dispatch_loop(
    inner: Arc<ServerInner>,
    mut sub: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = sub.recv() => match message {
                None => break,
                Some(bytes) => match envelope::decode_call(&bytes) {
                    Err(e) => tracing::error!(error = %e, "dropping undecodable call"),
                    Ok(call) => {
                        let permit = match inner.limiter.clone().acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => break,
                        };
                        let inner = inner.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            handle_call(inner, call).await;
                        });
                    }
                },
            }
        }
    }
    sub.unsubscribe();
    tracing::debug!("rpc server dispatch loop stopped");
}

async fn handle_call(inner: Arc<ServerInner>, call: CallEnvelope) {
    let started = Instant::now();
    let fn_name = call.fn_name.clone();
    let listener = inner
        .listener
        .lock()
        .expect("listener lock poisoned")
        .clone();

    let info = {
        let handlers = inner.handlers.read().expect("handler table lock poisoned");
        handlers.get(&fn_name).cloned()
    };
    let info = match info {
        Some(info) => Some(info),
        None => listener
            .as_ref()
            .and_then(|l| l.no_found_function(&fn_name)),
    };

    let result: Result<Value, String> = match info {
        None => {
            tracing::warn!(func = %fn_name, "no handler registered");
            Err(format!("remote function not found: {fn_name}"))
        }
        Some(info) => {
            let gate = listener
                .as_ref()
                .map_or(Ok(()), |l| l.before_handle(&fn_name, &call));
            match gate {
                Err(e) => Err(e),
                Ok(()) => match decode_args(&inner.codecs, &call) {
                    Err(e) => Err(e),
                    Ok(args) => execute(info, args).await,
                },
            }
        }
    };

    if call.reply_wanted {
        let reply = match &result {
            Ok(value) => match inner.codecs.encode(value) {
                Ok((tag, bytes)) => ResultEnvelope::ok(call.cid.clone(), tag, bytes),
                Err(e) => {
                    ResultEnvelope::fail(call.cid.clone(), format!("result encode: {e}"))
                }
            },
            Err(error) => ResultEnvelope::fail(call.cid.clone(), error.clone()),
        };
        match envelope::encode_result(&reply) {
            Ok(body) => {
                if let Err(e) = inner.transport.publish(&call.reply_to, body).await {
                    tracing::error!(error = %e, reply_to = %call.reply_to, "reply publish failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "reply encode failed"),
        }
    }

    let exec_ns = started.elapsed().as_nanos() as i64;
    if envelope::is_expired(call.expires_at_ms) {
        inner.stats.on_timeout(&fn_name);
        if let Some(l) = &listener {
            l.on_timeout(&fn_name, call.expires_at_ms);
        }
    } else {
        match &result {
            Ok(_) => {
                inner.stats.on_complete(&fn_name, exec_ns);
                if let Some(l) = &listener {
                    l.on_complete(&fn_name, exec_ns);
                }
            }
            Err(e) => {
                inner.stats.on_error(&fn_name);
                if let Some(l) = &listener {
                    l.on_error(&fn_name, e);
                }
            }
        }
    }
}

fn decode_args(codecs: &CodecRegistry, call: &CallEnvelope) -> Result<Vec<Value>, String> {
    let mut args = Vec::with_capacity(call.args.len());
    for (index, (tag, payload)) in call.args.iter().enumerate() {
        match codecs.decode(tag, payload) {
            Ok(value) => args.push(value),
            Err(e) => return Err(format!("args[{index}] error: {e}")),
        }
    }
    Ok(args)
}

/// Run a handler inside a protected frame: panics become failure results.
async fn execute(info: FunctionInfo, args: Vec<Value>) -> Result<Value, String> {
    match info {
        FunctionInfo::Sync(handler) => {
            match catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
                Ok(result) => result,
                Err(panic) => {
                    let msg = panic_message(panic);
                    tracing::error!(panic = %msg, "recovered handler panic");
                    Err(format!("handler panic: {msg}"))
                }
            }
        }
        FunctionInfo::Deferred(handler) => {
            let (responder, rx) = Responder::channel();
            let panicked = catch_unwind(AssertUnwindSafe(|| handler.call(args, responder)))
                .err()
                .map(panic_message);
            if let Some(msg) = &panicked {
                tracing::error!(panic = %msg, "recovered handler panic");
            }
            let result = rx
                .await
                .unwrap_or_else(|_| Err(RESPONDER_DROPPED.to_string()));
            match (panicked, result) {
                (Some(msg), Err(e)) if e == RESPONDER_DROPPED => {
                    Err(format!("handler panic: {msg}"))
                }
                (_, result) => result,
            }
        }
    }
}
