//! Runtime settings for RPC clients, servers, and the selector cache.
//!
//! These structs are plain serde-deserializable data so an external
//! configuration loader can fill them from whatever format it likes; every
//! field has a default, and `Default` produces a working configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_call_timeout_secs() -> u64 {
    5
}

fn default_max_dispatch() -> usize {
    100
}

fn default_cache_ttl_secs() -> u64 {
    60
}

/// Settings shared by RPC clients and servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Call budget in seconds: how long a caller waits for a reply before
    /// giving up with a deadline error. Also stamps the absolute expiry
    /// carried in each call envelope.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Maximum number of handler invocations a server runs concurrently.
    /// Further inbound calls queue in the dispatch loop until a slot frees.
    #[serde(default = "default_max_dispatch")]
    pub max_dispatch: usize,

    /// Log every client call (function, elapsed time, outcome) at info level.
    #[serde(default)]
    pub log_calls: bool,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            max_dispatch: default_max_dispatch(),
            log_calls: false,
        }
    }
}

impl RpcSettings {
    /// The call budget as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Settings for the caching selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// How long a cached node list stays valid without a registry event.
    /// Watch-driven invalidation usually evicts entries well before this.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheSettings {
    /// The cache TTL as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
