//! Per-function execution statistics.
//!
//! The server keeps one bucket per registered function, updated under a
//! write lock on every completion. The snapshot path is read-mostly and
//! infrequent; it stamps the window end time but deliberately never resets
//! the counters, so they are monotonically non-decreasing between snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Execution counters for a single function.
///
/// `min_exec_time` / `max_exec_time` track successful executions only, in
/// nanoseconds. The first success initializes both to that execution's time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticalMethod {
    /// Function name.
    pub name: String,
    /// Window start, nanoseconds since the unix epoch (first observation).
    pub start_time: i64,
    /// Window end, stamped on snapshot.
    pub end_time: i64,
    /// Shortest successful execution, nanoseconds.
    pub min_exec_time: i64,
    /// Longest successful execution, nanoseconds.
    pub max_exec_time: i64,
    /// Total completions of any kind.
    pub exec_total: u64,
    /// Completions that landed past the caller's expiry.
    pub exec_timeout: u64,
    /// Successful completions.
    pub exec_success: u64,
    /// Failed completions.
    pub exec_failure: u64,
}

impl StatisticalMethod {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_time: now_ns(),
            end_time: 0,
            min_exec_time: 0,
            max_exec_time: 0,
            exec_total: 0,
            exec_timeout: 0,
            exec_success: 0,
            exec_failure: 0,
        }
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}

/// Thread-safe per-function statistics table.
#[derive(Default)]
pub struct MethodStats {
    inner: RwLock<HashMap<String, StatisticalMethod>>,
}

impl MethodStats {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion that landed past the caller's expiry.
    pub fn on_timeout(&self, fn_name: &str) {
        let mut table = self.inner.write().expect("stats lock poisoned");
        let bucket = table
            .entry(fn_name.to_string())
            .or_insert_with(|| StatisticalMethod::new(fn_name));
        bucket.exec_timeout += 1;
        bucket.exec_total += 1;
    }

    /// Record a failed completion.
    pub fn on_error(&self, fn_name: &str) {
        let mut table = self.inner.write().expect("stats lock poisoned");
        let bucket = table
            .entry(fn_name.to_string())
            .or_insert_with(|| StatisticalMethod::new(fn_name));
        bucket.exec_failure += 1;
        bucket.exec_total += 1;
    }

    /// Record a successful completion that took `exec_ns` nanoseconds.
    pub fn on_complete(&self, fn_name: &str, exec_ns: i64) {
        let mut table = self.inner.write().expect("stats lock poisoned");
        let bucket = table
            .entry(fn_name.to_string())
            .or_insert_with(|| StatisticalMethod::new(fn_name));
        if bucket.exec_success == 0 {
            bucket.min_exec_time = exec_ns;
            bucket.max_exec_time = exec_ns;
        } else {
            bucket.min_exec_time = bucket.min_exec_time.min(exec_ns);
            bucket.max_exec_time = bucket.max_exec_time.max(exec_ns);
        }
        bucket.exec_success += 1;
        bucket.exec_total += 1;
    }

    /// Stamp the window end on every bucket and return a snapshot.
    ///
    /// Counters are not reset; successive snapshots see non-decreasing
    /// values.
    pub fn snapshot(&self) -> HashMap<String, StatisticalMethod> {
        let mut table = self.inner.write().expect("stats lock poisoned");
        let now = now_ns();
        for bucket in table.values_mut() {
            bucket.end_time = now;
        }
        table.clone()
    }

    /// The snapshot serialized as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot())
    }
}

/// Parse a snapshot previously produced by [`MethodStats::to_json`].
/// Returns `None` if the string is not a valid snapshot.
pub fn parse_snapshot(json: &str) -> Option<HashMap<String, StatisticalMethod>> {
    serde_json::from_str(json).ok()
}
