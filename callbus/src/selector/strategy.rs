//! Load-balancing strategies.
//!
//! A strategy is a pure function from a candidate node list to a
//! [`NodeSequence`] the caller pulls endpoints from. The two baseline
//! strategies are round-robin and random; anything else plugs in through
//! [`Strategy::custom`].

use crate::error::SelectorError;
use crate::registry::Node;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An iterable sequence of candidate nodes produced by a strategy.
pub struct NodeSequence {
    next: Box<dyn FnMut() -> Result<Node, SelectorError> + Send>,
}

impl NodeSequence {
    /// Build a sequence from a pull function.
    pub fn from_fn(
        next: impl FnMut() -> Result<Node, SelectorError> + Send + 'static,
    ) -> Self {
        Self {
            next: Box::new(next),
        }
    }

    /// Pull the next candidate node.
    pub fn next(&mut self) -> Result<Node, SelectorError> {
        (self.next)()
    }
}

/// A node selection strategy.
///
/// Cloning a strategy shares its internal state: every selection made
/// through clones of one round-robin strategy advances the same cursor.
#[derive(Clone)]
pub struct Strategy {
    apply: Arc<dyn Fn(Vec<Node>) -> NodeSequence + Send + Sync>,
}

impl Strategy {
    /// Cyclic selection over the candidate list.
    ///
    /// The cursor is shared across every `select` made with this strategy
    /// value, so separate selections start at staggered positions instead
    /// of all herding onto the first node, while consecutive pulls from one
    /// sequence walk the list in order.
    pub fn round_robin() -> Self {
        let cursor = Arc::new(AtomicUsize::new(0));
        Self::custom(move |nodes: Vec<Node>| {
            let cursor = cursor.clone();
            NodeSequence::from_fn(move || {
                if nodes.is_empty() {
                    return Err(SelectorError::NoneAvailable(String::new()));
                }
                let position = cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
                Ok(nodes[position].clone())
            })
        })
    }

    /// Uniformly random selection on every pull.
    pub fn random() -> Self {
        Self::custom(|nodes: Vec<Node>| {
            NodeSequence::from_fn(move || {
                use rand::prelude::IndexedRandom;
                nodes
                    .choose(&mut rand::rng())
                    .cloned()
                    .ok_or_else(|| SelectorError::NoneAvailable(String::new()))
            })
        })
    }

    /// A user-supplied strategy function.
    pub fn custom(apply: impl Fn(Vec<Node>) -> NodeSequence + Send + Sync + 'static) -> Self {
        Self {
            apply: Arc::new(apply),
        }
    }

    /// Apply the strategy to a candidate list.
    pub fn apply(&self, nodes: Vec<Node>) -> NodeSequence {
        (self.apply)(nodes)
    }
}
