//! Typed-tag argument codec registry.
//!
//! Call arguments cross the bus as `(type tag, byte payload)` pairs. The
//! registry maps values to pairs and back:
//!
//! ```text
//! encode:  Value ──► (tag, bytes)     UnsupportedType if nothing claims it
//! decode:  (tag, bytes) ──► Value     UnknownTag if no codec owns the tag
//! ```
//!
//! Built-in codecs cover the scalar types, strings, and byte blobs under
//! convention-fixed tags. Anything else travels as [`Value::Ext`]: an opaque
//! `(tag, bytes)` pair owned by a custom [`ExtCodec`] registered by name.
//! This is how high-level types (a serialized session handle, a protocol
//! frame) cross the RPC boundary without the core knowing their structure.
//!
//! Custom codecs are tried in registration order for encode; the first one
//! returning a non-empty tag wins. Decode goes straight to the codec that
//! declared the tag. Encoding and decoding are pure transformations.

use crate::error::CodecError;
use std::collections::HashMap;
use std::sync::Arc;

/// Tag for the absent value.
pub const TAG_NULL: &str = "";
/// Tag for booleans.
pub const TAG_BOOL: &str = "bool";
/// Tag for 64-bit signed integers.
pub const TAG_INT: &str = "int";
/// Tag for 64-bit floats.
pub const TAG_FLOAT: &str = "float";
/// Tag for UTF-8 strings.
pub const TAG_STRING: &str = "string";
/// Tag for raw byte blobs.
pub const TAG_BYTES: &str = "bytes";

/// A dynamically typed call argument or result.
///
/// The RPC layer is untyped by design: handlers receive and return `Value`s,
/// and the codec registry is the single place that knows how each variant
/// maps to bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value. Encodes to the empty tag with an empty payload.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw byte blob.
    Bytes(Vec<u8>),
    /// An opaque value owned by a custom codec. The core only carries the
    /// tag and bytes; interpretation happens at the edges.
    Ext {
        /// The custom codec's type tag.
        tag: String,
        /// The serialized payload.
        data: Vec<u8>,
    },
}

impl Value {
    /// Human-readable name of the variant, used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Ext { tag, .. } => tag,
        }
    }

    /// Borrow the string content, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer content, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean content, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the blob content, if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

/// A pluggable codec for values the built-ins do not cover.
///
/// Implementations own one or more unique type tags. `encode` returns
/// `Ok(None)` for values it does not claim, so the registry can continue
/// down the registration order.
pub trait ExtCodec: Send + Sync {
    /// Try to encode a value. `Ok(None)` means "not mine"; `Ok(Some((tag,
    /// bytes)))` claims the value. The returned tag must be one of
    /// [`tags`](ExtCodec::tags).
    fn encode(&self, value: &Value) -> Result<Option<(String, Vec<u8>)>, CodecError>;

    /// Decode a payload carrying one of this codec's tags.
    fn decode(&self, tag: &str, data: &[u8]) -> Result<Value, CodecError>;

    /// The tags this codec owns.
    fn tags(&self) -> Vec<String>;
}

/// Registry of built-in and custom argument codecs.
///
/// Construction registers the built-ins; custom codecs are added with
/// [`register`](CodecRegistry::register) before the registry is shared
/// (typically `Arc`-wrapped) with clients and servers.
pub struct CodecRegistry {
    /// Custom codecs in registration order, keyed by registration name.
    order: Vec<(String, Arc<dyn ExtCodec>)>,
    /// Tag → codec index for decode.
    by_tag: HashMap<String, Arc<dyn ExtCodec>>,
}

impl CodecRegistry {
    /// Create a registry with only the built-in scalar codecs.
    pub fn new() -> Self {
        Self {
            order: Vec::new(),
            by_tag: HashMap::new(),
        }
    }

    /// Register a custom codec under a unique name.
    ///
    /// Fails with [`CodecError::DuplicateCodec`] if the name or any of the
    /// codec's tags is already taken (built-in tags included).
    pub fn register(
        &mut self,
        name: &str,
        codec: Arc<dyn ExtCodec>,
    ) -> Result<(), CodecError> {
        if self.order.iter().any(|(n, _)| n == name) {
            return Err(CodecError::DuplicateCodec(name.to_string()));
        }
        for tag in codec.tags() {
            if Self::is_builtin_tag(&tag) || self.by_tag.contains_key(&tag) {
                return Err(CodecError::DuplicateCodec(tag));
            }
        }
        for tag in codec.tags() {
            self.by_tag.insert(tag, codec.clone());
        }
        self.order.push((name.to_string(), codec));
        Ok(())
    }

    fn is_builtin_tag(tag: &str) -> bool {
        matches!(
            tag,
            TAG_NULL | TAG_BOOL | TAG_INT | TAG_FLOAT | TAG_STRING | TAG_BYTES
        )
    }

    /// Encode a value to its `(tag, bytes)` wire form.
    pub fn encode(&self, value: &Value) -> Result<(String, Vec<u8>), CodecError> {
        match value {
            Value::Null => Ok((TAG_NULL.to_string(), Vec::new())),
            Value::Bool(b) => Ok((TAG_BOOL.to_string(), vec![u8::from(*b)])),
            Value::Int(n) => Ok((TAG_INT.to_string(), n.to_le_bytes().to_vec())),
            Value::Float(f) => Ok((TAG_FLOAT.to_string(), f.to_le_bytes().to_vec())),
            Value::Str(s) => Ok((TAG_STRING.to_string(), s.as_bytes().to_vec())),
            Value::Bytes(b) => Ok((TAG_BYTES.to_string(), b.clone())),
            Value::Ext { .. } => {
                for (_, codec) in &self.order {
                    if let Some((tag, bytes)) = codec.encode(value)? {
                        if !tag.is_empty() {
                            return Ok((tag, bytes));
                        }
                    }
                }
                Err(CodecError::UnsupportedType(value.type_name().to_string()))
            }
        }
    }

    /// Decode a `(tag, bytes)` pair back into a value.
    pub fn decode(&self, tag: &str, data: &[u8]) -> Result<Value, CodecError> {
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => match data {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                _ => Err(CodecError::Malformed(format!(
                    "bool payload must be one byte, got {}",
                    data.len()
                ))),
            },
            TAG_INT => {
                let bytes: [u8; 8] = data.try_into().map_err(|_| {
                    CodecError::Malformed(format!(
                        "int payload must be 8 bytes, got {}",
                        data.len()
                    ))
                })?;
                Ok(Value::Int(i64::from_le_bytes(bytes)))
            }
            TAG_FLOAT => {
                let bytes: [u8; 8] = data.try_into().map_err(|_| {
                    CodecError::Malformed(format!(
                        "float payload must be 8 bytes, got {}",
                        data.len()
                    ))
                })?;
                Ok(Value::Float(f64::from_le_bytes(bytes)))
            }
            TAG_STRING => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| CodecError::Malformed(format!("invalid UTF-8: {e}")))?;
                Ok(Value::Str(s.to_string()))
            }
            TAG_BYTES => Ok(Value::Bytes(data.to_vec())),
            other => match self.by_tag.get(other) {
                Some(codec) => codec.decode(other, data),
                None => Err(CodecError::UnknownTag(other.to_string())),
            },
        }
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
