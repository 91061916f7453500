//! Wire envelopes for calls and results.
//!
//! # Binary Format
//!
//! Little-endian, length-prefixed, cross-language-safe. Call frame:
//!
//! ```text
//! [kind: 1 byte = 1]
//! [cid_len: u32][cid: UTF-8]
//! [fn_len: u32][fn_name: UTF-8]
//! [reply_to_len: u32][reply_to: UTF-8]     // empty when no reply wanted
//! [expires_at_ms: i64]                     // absolute, unix millis
//! [reply_wanted: 1 byte]
//! [argc: u32]
//! argc × { [tag_len: u32][tag: UTF-8][payload_len: u32][payload] }
//! ```
//!
//! Result frame:
//!
//! ```text
//! [kind: 1 byte = 2]
//! [cid_len: u32][cid: UTF-8]
//! [tag_len: u32][result_tag: UTF-8]
//! [payload_len: u32][result]
//! [error_len: u32][error: UTF-8]           // empty string = success
//! ```
//!
//! A truncated buffer surfaces as [`CodecError::Io`]; a wrong kind byte or
//! invalid UTF-8 as [`CodecError::Malformed`]. Frames are capped at 1 MiB.

use crate::error::CodecError;
use std::io::{Cursor, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum frame size: 1 MiB.
const MAX_FRAME: usize = 1024 * 1024;

const KIND_CALL: u8 = 1;
const KIND_RESULT: u8 = 2;

/// A single outbound call. Created by the client, consumed once by the
/// server, never mutated after send.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    /// Correlation id, unique among the issuing client's pending calls.
    pub cid: String,
    /// Registered function name to invoke.
    pub fn_name: String,
    /// Subject the reply should be published to (the client's inbox).
    /// Empty when `reply_wanted` is false.
    pub reply_to: String,
    /// Absolute expiry, milliseconds since the unix epoch. A server
    /// completing past this instant fires the timeout hook as a courtesy.
    pub expires_at_ms: i64,
    /// Whether the caller is waiting for a result.
    pub reply_wanted: bool,
    /// Arguments as `(type tag, payload)` pairs, in call order.
    pub args: Vec<(String, Vec<u8>)>,
}

/// A single reply. Created by the server, consumed once by the originating
/// client. `error` is the end-to-end contract: empty means success, anything
/// else is the handler's error string.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    /// Correlation id copied from the call.
    pub cid: String,
    /// Type tag of the result payload.
    pub result_tag: String,
    /// Encoded result payload.
    pub result: Vec<u8>,
    /// Error string; empty on success.
    pub error: String,
}

impl ResultEnvelope {
    /// A successful reply carrying an encoded result.
    pub fn ok(cid: impl Into<String>, tag: impl Into<String>, result: Vec<u8>) -> Self {
        Self {
            cid: cid.into(),
            result_tag: tag.into(),
            result,
            error: String::new(),
        }
    }

    /// A failed reply carrying an error string.
    pub fn fail(cid: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            cid: cid.into(),
            result_tag: String::new(),
            result: Vec::new(),
            error: error.into(),
        }
    }

    /// Whether this reply carries an error.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Absolute expiry for a call issued now with the given budget.
pub fn deadline_ms(budget: Duration) -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    (now + budget).as_millis() as i64
}

/// Whether the given absolute expiry has passed.
pub fn is_expired(expires_at_ms: i64) -> bool {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64;
    now > expires_at_ms
}

/// Serialize a call envelope to wire format.
pub fn encode_call(call: &CallEnvelope) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::with_capacity(256);
    buffer.write_all(&[KIND_CALL])?;
    write_str(&mut buffer, &call.cid)?;
    write_str(&mut buffer, &call.fn_name)?;
    write_str(&mut buffer, &call.reply_to)?;
    buffer.write_all(&call.expires_at_ms.to_le_bytes())?;
    buffer.write_all(&[u8::from(call.reply_wanted)])?;
    buffer.write_all(&(call.args.len() as u32).to_le_bytes())?;
    for (tag, payload) in &call.args {
        write_str(&mut buffer, tag)?;
        write_blob(&mut buffer, payload)?;
    }
    check_size(buffer.len())?;
    Ok(buffer)
}

/// Deserialize a call envelope from wire format.
pub fn decode_call(data: &[u8]) -> Result<CallEnvelope, CodecError> {
    check_size(data.len())?;
    let mut cursor = Cursor::new(data);
    expect_kind(&mut cursor, KIND_CALL)?;

    let cid = read_str(&mut cursor)?;
    let fn_name = read_str(&mut cursor)?;
    let reply_to = read_str(&mut cursor)?;

    let mut buf = [0u8; 8];
    cursor.read_exact(&mut buf)?;
    let expires_at_ms = i64::from_le_bytes(buf);

    let mut flag = [0u8; 1];
    cursor.read_exact(&mut flag)?;
    let reply_wanted = flag[0] != 0;

    let mut count_buf = [0u8; 4];
    cursor.read_exact(&mut count_buf)?;
    let argc = u32::from_le_bytes(count_buf) as usize;

    let mut args = Vec::with_capacity(argc.min(64));
    for _ in 0..argc {
        let tag = read_str(&mut cursor)?;
        let payload = read_blob(&mut cursor)?;
        args.push((tag, payload));
    }

    Ok(CallEnvelope {
        cid,
        fn_name,
        reply_to,
        expires_at_ms,
        reply_wanted,
        args,
    })
}

/// Serialize a result envelope to wire format.
pub fn encode_result(result: &ResultEnvelope) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::with_capacity(128);
    buffer.write_all(&[KIND_RESULT])?;
    write_str(&mut buffer, &result.cid)?;
    write_str(&mut buffer, &result.result_tag)?;
    write_blob(&mut buffer, &result.result)?;
    write_str(&mut buffer, &result.error)?;
    check_size(buffer.len())?;
    Ok(buffer)
}

/// Deserialize a result envelope from wire format.
pub fn decode_result(data: &[u8]) -> Result<ResultEnvelope, CodecError> {
    check_size(data.len())?;
    let mut cursor = Cursor::new(data);
    expect_kind(&mut cursor, KIND_RESULT)?;

    let cid = read_str(&mut cursor)?;
    let result_tag = read_str(&mut cursor)?;
    let result = read_blob(&mut cursor)?;
    let error = read_str(&mut cursor)?;

    Ok(ResultEnvelope {
        cid,
        result_tag,
        result,
        error,
    })
}

fn check_size(size: usize) -> Result<(), CodecError> {
    if size > MAX_FRAME {
        return Err(CodecError::FrameTooLarge {
            size,
            max: MAX_FRAME,
        });
    }
    Ok(())
}

fn expect_kind(cursor: &mut Cursor<&[u8]>, expected: u8) -> Result<(), CodecError> {
    let mut kind = [0u8; 1];
    cursor.read_exact(&mut kind)?;
    if kind[0] != expected {
        return Err(CodecError::Malformed(format!(
            "unexpected frame kind {} (wanted {expected})",
            kind[0]
        )));
    }
    Ok(())
}

fn write_str(buffer: &mut Vec<u8>, s: &str) -> Result<(), CodecError> {
    write_blob(buffer, s.as_bytes())
}

fn write_blob(buffer: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    buffer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    buffer.write_all(bytes)?;
    Ok(())
}

fn read_str(cursor: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let bytes = read_blob(cursor)?;
    String::from_utf8(bytes)
        .map_err(|e| CodecError::Malformed(format!("invalid UTF-8: {e}")))
}

fn read_blob(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>, CodecError> {
    let mut len_buf = [0u8; 4];
    cursor.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME {
        return Err(CodecError::FrameTooLarge {
            size: len,
            max: MAX_FRAME,
        });
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_call() -> CallEnvelope {
        CallEnvelope {
            cid: "inbox7.42".to_string(),
            fn_name: "Echo".to_string(),
            reply_to: "_INBOX.abc".to_string(),
            expires_at_ms: 1_700_000_000_123,
            reply_wanted: true,
            args: vec![
                ("string".to_string(), b"hello".to_vec()),
                ("int".to_string(), 7i64.to_le_bytes().to_vec()),
            ],
        }
    }

    #[test]
    fn test_call_round_trip() {
        let call = sample_call();
        let wire = encode_call(&call).unwrap();
        let decoded = decode_call(&wire).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn test_call_round_trip_no_reply() {
        let call = CallEnvelope {
            reply_wanted: false,
            reply_to: String::new(),
            args: Vec::new(),
            ..sample_call()
        };
        let wire = encode_call(&call).unwrap();
        let decoded = decode_call(&wire).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn test_result_round_trip() {
        let result = ResultEnvelope::ok("inbox7.42", "string", b"hello".to_vec());
        let wire = encode_result(&result).unwrap();
        let decoded = decode_result(&wire).unwrap();
        assert_eq!(decoded, result);
        assert!(!decoded.is_error());
    }

    #[test]
    fn test_error_result_round_trip() {
        let result = ResultEnvelope::fail("inbox7.42", "deadline exceeded");
        let wire = encode_result(&result).unwrap();
        let decoded = decode_result(&wire).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded.error, "deadline exceeded");
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let wire = encode_result(&ResultEnvelope::fail("x", "boom")).unwrap();
        let result = decode_call(&wire);
        assert!(matches!(result, Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let wire = encode_call(&sample_call()).unwrap();
        let result = decode_call(&wire[..wire.len() / 2]);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let call = CallEnvelope {
            args: vec![("bytes".to_string(), vec![0u8; MAX_FRAME + 1])],
            ..sample_call()
        };
        let result = encode_call(&call);
        assert!(matches!(result, Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_deadline_in_the_future() {
        let expiry = deadline_ms(Duration::from_secs(5));
        assert!(!is_expired(expiry));
        assert!(is_expired(expiry - 6_000));
    }
}
