//! Handler registration types and the reply completion capability.

use crate::codec::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Error string sent when a deferred handler drops its [`Responder`]
/// without replying.
pub(crate) const RESPONDER_DROPPED: &str = "handler dropped its responder without replying";

/// Completion capability handed to deferred handlers.
///
/// The handler may move the responder to another task and invoke it later;
/// the server replies to the caller only when one of the consuming methods
/// runs. Dropping an unconsumed responder sends a failure result instead,
/// so a forgetful handler can never leave the caller waiting for the full
/// timeout on a call the server has already abandoned.
pub struct Responder {
    tx: Option<oneshot::Sender<Result<Value, String>>>,
}

impl Responder {
    /// Create a responder and the receiver the dispatch task waits on.
    pub(crate) fn channel() -> (Responder, oneshot::Receiver<Result<Value, String>>) {
        let (tx, rx) = oneshot::channel();
        (Responder { tx: Some(tx) }, rx)
    }

    /// Complete the call with a successful result.
    pub fn succeed(mut self, value: Value) {
        self.resolve(Ok(value));
    }

    /// Complete the call with an error string.
    pub fn fail(mut self, error: impl Into<String>) {
        self.resolve(Err(error.into()));
    }

    fn resolve(&mut self, result: Result<Value, String>) {
        if let Some(tx) = self.tx.take() {
            // The dispatch task only disappears on server shutdown; a failed
            // send just means nobody is left to reply to.
            let _ = tx.send(result);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!("responder dropped without a reply");
            let _ = tx.send(Err(RESPONDER_DROPPED.to_string()));
        }
    }
}

/// A handler that produces its result synchronously.
///
/// Runs on its own task but should return promptly; long-running work
/// belongs in a [`DeferredHandler`].
pub trait SyncHandler: Send + Sync + 'static {
    /// Handle one call with decoded arguments.
    fn call(&self, args: Vec<Value>) -> Result<Value, String>;
}

impl<F> SyncHandler for F
where
    F: Fn(Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, String> {
        self(args)
    }
}

/// A handler that completes through a [`Responder`], possibly from another
/// task at a later time.
pub trait DeferredHandler: Send + Sync + 'static {
    /// Handle one call; the reply is sent when `responder` is consumed.
    fn call(&self, args: Vec<Value>, responder: Responder);
}

impl<F> DeferredHandler for F
where
    F: Fn(Vec<Value>, Responder) + Send + Sync + 'static,
{
    fn call(&self, args: Vec<Value>, responder: Responder) {
        self(args, responder)
    }
}

/// A registered function: either shape of handler.
#[derive(Clone)]
pub enum FunctionInfo {
    /// Replies with the handler's return value.
    Sync(Arc<dyn SyncHandler>),
    /// Replies when the handler invokes its responder.
    Deferred(Arc<dyn DeferredHandler>),
}

impl FunctionInfo {
    /// Wrap a synchronous handler.
    pub fn sync(handler: impl SyncHandler) -> Self {
        FunctionInfo::Sync(Arc::new(handler))
    }

    /// Wrap a deferred handler.
    pub fn deferred(handler: impl DeferredHandler) -> Self {
        FunctionInfo::Deferred(Arc::new(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_responder_succeed() {
        let (responder, rx) = Responder::channel();
        responder.succeed(Value::Int(7));
        assert_eq!(rx.await.unwrap(), Ok(Value::Int(7)));
    }

    #[tokio::test]
    async fn test_responder_fail() {
        let (responder, rx) = Responder::channel();
        responder.fail("nope");
        assert_eq!(rx.await.unwrap(), Err("nope".to_string()));
    }

    #[tokio::test]
    async fn test_responder_dropped_sends_failure() {
        let (responder, rx) = Responder::channel();
        drop(responder);
        assert_eq!(rx.await.unwrap(), Err(RESPONDER_DROPPED.to_string()));
    }

    #[tokio::test]
    async fn test_responder_completes_from_another_task() {
        let (responder, rx) = Responder::channel();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            responder.succeed(Value::Str("later".to_string()));
        });
        assert_eq!(rx.await.unwrap(), Ok(Value::Str("later".to_string())));
    }
}
