//! RPC client: issues calls against a resolved node and correlates replies.
//!
//! # Design
//!
//! ```text
//! caller task                    reply listener task
//! ───────────                    ───────────────────
//! encode args                    subscribe(inbox)
//! insert PendingCall ──────┐     loop:
//! publish CallEnvelope     │       recv ResultEnvelope
//! select:                  │       remove PendingCall by cid ◄─┘
//!   reply on oneshot  ◄────┴────── send over oneshot
//!   deadline elapsed → remove    (no entry: log + drop)
//! ```
//!
//! Each pending call is a single-slot oneshot channel keyed by correlation
//! id. Whichever side removes the entry first owns resolution, so a genuine
//! reply racing the timeout yields exactly one outcome to the caller. A
//! reply arriving after the timeout finds no entry and is logged and
//! dropped; it can never panic the listener or double-deliver.
//!
//! `done()` performs bulk cancellation: the pending table is taken and
//! dropped, which closes every outstanding oneshot and wakes blocked
//! callers with [`RpcError::Closed`] rather than leaving them hung. The
//! listener task watches a shutdown channel and exits deterministically.

use crate::codec::{CodecRegistry, Value};
use crate::config::RpcSettings;
use crate::error::RpcError;
use crate::rpc::envelope::{self, CallEnvelope, ResultEnvelope};
use crate::rpc::panic_message;
use crate::transport::{new_inbox, token, Subscription, Transport};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

/// A call waiting for its reply. Exists strictly between send and
/// resolution; removed from the table exactly once.
struct PendingCall {
    tx: oneshot::Sender<ResultEnvelope>,
    #[allow(dead_code)]
    deadline: tokio::time::Instant,
}

/// Pending-call table. `None` after `done()`, turning further use into an
/// ordinary [`RpcError::Closed`].
type PendingTable = Mutex<Option<HashMap<String, PendingCall>>>;

/// Client half of the RPC protocol, bound to one destination address.
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    codecs: Arc<CodecRegistry>,
    settings: RpcSettings,
    call_timeout: Duration,
    /// Destination subject. Swappable so a registry update can re-point the
    /// session without tearing down pending calls.
    target: RwLock<String>,
    inbox: String,
    cid_prefix: String,
    seq: AtomicU64,
    pending: Arc<PendingTable>,
    shutdown: watch::Sender<bool>,
}

impl RpcClient {
    /// Create a client bound to the given destination subject. Subscribes a
    /// unique reply inbox and spawns the reply listener before returning.
    pub async fn new(
        transport: Arc<dyn Transport>,
        codecs: Arc<CodecRegistry>,
        settings: RpcSettings,
        target: impl Into<String>,
    ) -> Result<Self, RpcError> {
        let inbox = new_inbox();
        let sub = transport.subscribe(&inbox).await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let pending: Arc<PendingTable> = Arc::new(Mutex::new(Some(HashMap::new())));
        tokio::spawn(reply_loop(sub, pending.clone(), shutdown_rx));
        Ok(Self {
            transport,
            codecs,
            call_timeout: settings.call_timeout(),
            settings,
            target: RwLock::new(target.into()),
            inbox,
            cid_prefix: token(8),
            seq: AtomicU64::new(1),
            pending,
            shutdown,
        })
    }

    /// Override the call budget from the settings default.
    pub fn with_call_timeout(mut self, budget: Duration) -> Self {
        self.call_timeout = budget;
        self
    }

    /// The subject replies arrive on.
    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    /// The current destination subject.
    pub fn target(&self) -> String {
        self.target.read().expect("target lock poisoned").clone()
    }

    /// Re-point the client at a new destination subject. Pending calls keep
    /// their original destination; only future calls are affected.
    pub fn set_target(&self, target: impl Into<String>) {
        *self.target.write().expect("target lock poisoned") = target.into();
    }

    /// Number of calls currently awaiting replies.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .as_ref()
            .map(HashMap::len)
            .unwrap_or(0)
    }

    fn next_cid(&self) -> String {
        format!(
            "{}.{}",
            self.cid_prefix,
            self.seq.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Invoke a remote function and wait for its result within the call
    /// budget. Arguments are encoded through the codec registry; an argument
    /// no codec claims fails locally with [`RpcError::Argument`].
    pub async fn call(&self, fn_name: &str, params: &[Value]) -> Result<Value, RpcError> {
        let started = Instant::now();
        let mut args = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            let pair = self
                .codecs
                .encode(param)
                .map_err(|source| RpcError::Argument { index, source })?;
            args.push(pair);
        }
        let outcome = self.call_args(fn_name, args).await;
        if self.settings.log_calls {
            match &outcome {
                Ok(_) => tracing::info!(
                    func = fn_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "rpc call ok"
                ),
                Err(e) => tracing::info!(
                    func = fn_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "rpc call failed"
                ),
            }
        }
        outcome
    }

    /// Invoke a remote function with pre-encoded `(tag, payload)` arguments.
    pub async fn call_args(
        &self,
        fn_name: &str,
        args: Vec<(String, Vec<u8>)>,
    ) -> Result<Value, RpcError> {
        let cid = self.next_cid();
        let deadline = tokio::time::Instant::now() + self.call_timeout;
        let call = CallEnvelope {
            cid: cid.clone(),
            fn_name: fn_name.to_string(),
            reply_to: self.inbox.clone(),
            expires_at_ms: envelope::deadline_ms(self.call_timeout),
            reply_wanted: true,
            args,
        };
        let body = envelope::encode_call(&call)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock().expect("pending table lock poisoned");
            match guard.as_mut() {
                None => return Err(RpcError::Closed),
                Some(table) => {
                    table.insert(cid.clone(), PendingCall { tx, deadline });
                }
            }
        }

        let target = self.target();
        if let Err(e) = self.transport.publish(&target, body).await {
            self.remove_pending(&cid);
            return Err(e.into());
        }

        tokio::select! {
            reply = rx => match reply {
                Ok(result) => {
                    if result.is_error() {
                        Err(RpcError::Remote(result.error))
                    } else {
                        Ok(self.codecs.decode(&result.result_tag, &result.result)?)
                    }
                }
                // Sender dropped without a reply: done() drained the table.
                Err(_) => Err(RpcError::Closed),
            },
            _ = tokio::time::sleep_until(deadline) => {
                self.remove_pending(&cid);
                Err(RpcError::DeadlineExceeded)
            }
        }
    }

    /// Invoke a remote function without waiting for a reply. Only local
    /// encode and transport errors are reported.
    pub async fn call_nr(&self, fn_name: &str, params: &[Value]) -> Result<(), RpcError> {
        let started = Instant::now();
        let mut args = Vec::with_capacity(params.len());
        for (index, param) in params.iter().enumerate() {
            let pair = self
                .codecs
                .encode(param)
                .map_err(|source| RpcError::Argument { index, source })?;
            args.push(pair);
        }
        let outcome = self.call_nr_args(fn_name, args).await;
        if self.settings.log_calls {
            tracing::info!(
                func = fn_name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "rpc call-nr"
            );
        }
        outcome
    }

    /// Fire-and-forget with pre-encoded arguments.
    pub async fn call_nr_args(
        &self,
        fn_name: &str,
        args: Vec<(String, Vec<u8>)>,
    ) -> Result<(), RpcError> {
        if self
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .is_none()
        {
            return Err(RpcError::Closed);
        }
        let call = CallEnvelope {
            cid: self.next_cid(),
            fn_name: fn_name.to_string(),
            reply_to: String::new(),
            expires_at_ms: envelope::deadline_ms(self.call_timeout),
            reply_wanted: false,
            args,
        };
        let body = envelope::encode_call(&call)?;
        let target = self.target();
        self.transport.publish(&target, body).await?;
        Ok(())
    }

    /// Shut down the client: stop the reply listener, then cancel every
    /// outstanding call, delivering [`RpcError::Closed`] to blocked callers.
    /// Idempotent.
    pub fn done(&self) -> Result<(), RpcError> {
        let _ = self.shutdown.send(true);
        let drained = self
            .pending
            .lock()
            .expect("pending table lock poisoned")
            .take();
        if let Some(table) = drained {
            if !table.is_empty() {
                tracing::debug!(
                    outstanding = table.len(),
                    "closing client with calls still pending"
                );
            }
            // Dropping the table drops every oneshot sender, which wakes the
            // blocked callers with the closed signal.
        }
        Ok(())
    }

    fn remove_pending(&self, cid: &str) -> bool {
        self.pending
            .lock()
            .expect("pending table lock poisoned")
            .as_mut()
            .map(|table| table.remove(cid).is_some())
            .unwrap_or(false)
    }
}

/// Reply listener: one per client, runs until shutdown or unsubscription.
/// A malformed message or a panic in delivery is logged and never
/// terminates the loop.
async fn reply_loop(
    mut sub: Subscription,
    pending: Arc<PendingTable>,
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
                Some(bytes) => {
                    let guarded = catch_unwind(AssertUnwindSafe(|| {
                        deliver_reply(&pending, &bytes);
                    }));
                    if let Err(panic) = guarded {
                        tracing::error!(
                            panic = %panic_message(panic),
                            "recovered panic in reply listener"
                        );
                    }
                }
            }
        }
    }
    sub.unsubscribe();
}

fn deliver_reply(pending: &PendingTable, bytes: &[u8]) {
    let reply = match envelope::decode_result(bytes) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(error = %e, "dropping undecodable reply");
            return;
        }
    };
    let slot = pending
        .lock()
        .expect("pending table lock poisoned")
        .as_mut()
        .and_then(|table| table.remove(&reply.cid));
    match slot {
        Some(call) => {
            if call.tx.send(reply).is_err() {
                // The caller gave up between removal and delivery.
                tracing::debug!("caller gone before reply delivery");
            }
        }
        None => {
            // The caller most likely timed out and the server replied anyway.
            tracing::warn!(cid = %reply.cid, "no pending call for reply");
        }
    }
}
