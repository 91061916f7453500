//! Error types for the callbus RPC substrate.
//!
//! One enum per subsystem, converted at the seams with `#[from]`. Everything
//! that crosses the wire is flattened to a plain string in
//! `ResultEnvelope::error`; these types exist for local callers only.

use thiserror::Error;

/// Errors from argument and wire encoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No registered codec claims the value.
    #[error("unsupported argument type: {0}")]
    UnsupportedType(String),

    /// No codec is registered for the given type tag.
    #[error("unknown type tag: {0:?}")]
    UnknownTag(String),

    /// A codec is already registered under this name.
    #[error("codec already registered: {0:?}")]
    DuplicateCodec(String),

    /// The byte payload does not match its declared tag or frame layout.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max: {max} bytes)")]
    FrameTooLarge {
        /// Actual frame size in bytes.
        size: usize,
        /// Allowed maximum in bytes.
        max: usize,
    },

    /// I/O error while reading a frame (usually a truncated buffer).
    #[error("frame read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the publish/subscribe transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has been shut down.
    #[error("transport closed")]
    Closed,

    /// Publishing to the bus failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Creating a subscription failed.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Errors surfaced by RPC calls.
///
/// Local failures (`Codec`, `Argument`, `Transport`) return without a round
/// trip. `Remote` carries the handler's error string end to end.
/// `DeadlineExceeded` is deliberately ambiguous: the remote may have executed
/// and replied too late, or the request may have been lost.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Argument or result marshaling failed; never reached the network.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A specific call argument failed to encode.
    #[error("args[{index}] error: {source}")]
    Argument {
        /// Zero-based position of the offending argument.
        index: usize,
        /// The underlying encode failure.
        source: CodecError,
    },

    /// The bus rejected the publish or subscribe.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No response arrived within the call budget.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The remote handler returned a business error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Endpoint resolution failed before the call could be issued.
    #[error("selector error: {0}")]
    Selector(#[from] SelectorError),

    /// The client or server was shut down while the call was outstanding,
    /// or a call was attempted after `done()`.
    #[error("client closed")]
    Closed,
}

/// Errors from the service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry could not be reached.
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// Watch subscription failed.
    #[error("watch failed: {0}")]
    Watch(String),
}

/// Errors from endpoint selection.
#[derive(Debug, Error)]
pub enum SelectorError {
    /// Filtering left zero candidate nodes for the service.
    #[error("no nodes available for service {0:?}")]
    NoneAvailable(String),

    /// The underlying registry fetch failed and nothing cached could serve.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_carries_message() {
        let err = RpcError::Remote("insufficient funds".to_string());
        assert_eq!(err.to_string(), "remote error: insufficient funds");
    }

    #[test]
    fn test_argument_error_names_position() {
        let err = RpcError::Argument {
            index: 2,
            source: CodecError::UnsupportedType("Vec<f32>".to_string()),
        };
        assert!(err.to_string().starts_with("args[2] error"));
    }

    #[test]
    fn test_selector_error_from_registry() {
        let err: SelectorError = RegistryError::Unavailable("down".to_string()).into();
        assert!(matches!(err, SelectorError::Registry(_)));
    }
}
