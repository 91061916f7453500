//! Publish/subscribe transport abstraction.
//!
//! The RPC layer only needs a thin slice of a message bus: publish a byte
//! payload to a named subject, and subscribe to a subject to receive
//! payloads. Delivery is best-effort and non-durable with no ordering
//! guarantee across subjects; duplicate or lost messages are within the
//! failure domain and surface as call timeouts, never as retries.
//!
//! [`MemoryTransport`] provides an in-process implementation with exactly
//! these semantics, used by the test suite and any single-process
//! deployment. A production deployment plugs in a bus-backed implementation
//! behind the same trait.

pub mod memory;

pub use memory::MemoryTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};
use tokio::sync::mpsc;

/// Prefix for generated inbox subjects.
const INBOX_PREFIX: &str = "_INBOX.";

/// Generate a unique inbox subject for a client's replies or a server's
/// inbound calls.
pub fn new_inbox() -> String {
    format!("{INBOX_PREFIX}{}", token(16))
}

/// A random alphanumeric token of the given length.
pub(crate) fn token(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::rng(), len)
}

/// Byte-level publish/subscribe bus.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a payload to a subject. Publishing to a subject nobody is
    /// subscribed to is not an error; the payload is dropped.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe to a subject. The returned [`Subscription`] yields payloads
    /// until it is unsubscribed or dropped.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError>;
}

/// An active subscription to one subject.
///
/// Unsubscribes on drop; [`unsubscribe`](Subscription::unsubscribe) does the
/// same eagerly. Repeated unsubscription is a no-op.
pub struct Subscription {
    subject: String,
    rx: mpsc::Receiver<Vec<u8>>,
    unsub: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Assemble a subscription from its receiving channel and an
    /// unsubscribe action. Transport implementations call this.
    pub fn new(
        subject: String,
        rx: mpsc::Receiver<Vec<u8>>,
        unsub: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            subject,
            rx,
            unsub: Some(Box::new(unsub)),
        }
    }

    /// The subject this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Receive the next payload. Returns `None` once the subscription is
    /// closed and drained.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Stop receiving. Payloads published after this point are dropped.
    pub fn unsubscribe(&mut self) {
        if let Some(unsub) = self.unsub.take() {
            unsub();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsub) = self.unsub.take() {
            unsub();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_inbox_unique() {
        let a = new_inbox();
        let b = new_inbox();
        assert!(a.starts_with(INBOX_PREFIX));
        assert_ne!(a, b);
    }
}
