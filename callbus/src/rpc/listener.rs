//! Observability and interception hooks for the RPC server.

use crate::rpc::envelope::CallEnvelope;
use crate::rpc::handler::FunctionInfo;

/// Hooks invoked around server-side dispatch.
///
/// Every method has a no-op default, so implementors override only what
/// they need. The statistics table is updated by the server itself; these
/// hooks are for the module layer above it.
pub trait RpcListener: Send + Sync + 'static {
    /// Called when no handler is registered for `fn_name`. Returning a
    /// [`FunctionInfo`] supplies an adapter to run instead; `None` lets the
    /// server synthesize an unknown-function error result.
    fn no_found_function(&self, _fn_name: &str) -> Option<FunctionInfo> {
        None
    }

    /// Called before a handler executes. An error aborts execution and
    /// becomes the call's result.
    fn before_handle(&self, _fn_name: &str, _call: &CallEnvelope) -> Result<(), String> {
        Ok(())
    }

    /// Called when the server completes a call past the caller's stated
    /// expiry. A courtesy signal: the caller has most likely given up.
    fn on_timeout(&self, _fn_name: &str, _expires_at_ms: i64) {}

    /// Called when a handler fails.
    fn on_error(&self, _fn_name: &str, _error: &str) {}

    /// Called when a handler succeeds, with the execution time in
    /// nanoseconds.
    fn on_complete(&self, _fn_name: &str, _exec_ns: i64) {}
}
