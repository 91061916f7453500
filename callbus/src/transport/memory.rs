//! In-process message bus.
//!
//! One `mpsc` channel per subscribed subject. Publishing to an unknown
//! subject drops the payload, which is exactly the lost-message behavior a
//! networked bus exhibits; tests lean on this to exercise timeout paths.

use crate::error::TransportError;
use crate::transport::{Subscription, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Per-subject channel capacity. A full channel applies backpressure to the
/// publisher rather than dropping.
const SUBJECT_CAPACITY: usize = 1024;

/// In-process [`Transport`] backed by per-subject channels.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    subjects: Arc<Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>>,
}

impl MemoryTransport {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions, for tests.
    pub fn subscription_count(&self) -> usize {
        self.subjects.lock().expect("subject table lock poisoned").len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let sender = {
            let subjects = self.subjects.lock().expect("subject table lock poisoned");
            subjects.get(subject).cloned()
        };
        match sender {
            Some(tx) => {
                if tx.send(payload).await.is_err() {
                    // Receiver gone but not yet unsubscribed; same as no
                    // subscriber at all.
                    self.subjects
                        .lock()
                        .expect("subject table lock poisoned")
                        .remove(subject);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(SUBJECT_CAPACITY);
        {
            let mut subjects = self.subjects.lock().expect("subject table lock poisoned");
            if subjects.insert(subject.to_string(), tx).is_some() {
                tracing::debug!(subject, "replacing existing subscription");
            }
        }
        let subjects = self.subjects.clone();
        let unsub_subject = subject.to_string();
        Ok(Subscription::new(
            subject.to_string(),
            rx,
            move || {
                subjects
                    .lock()
                    .expect("subject table lock poisoned")
                    .remove(&unsub_subject);
            },
        ))
    }
}
