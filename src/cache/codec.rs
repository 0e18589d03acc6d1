//! Value codecs
//!
//! The serialize/deserialize pair applied around every backend write and
//! read. Adapters only ever see bytes.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{StorageError, StorageResult};

// == Value Codec ==
/// Converts cache values to and from the bytes handed to storage.
pub trait ValueCodec: Send + Sync {
    fn encode(&self, value: &Value) -> StorageResult<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> StorageResult<Value>;
}

/// Compact JSON. The default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode(&self, value: &Value) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

type EncodeFn = dyn Fn(&Value) -> StorageResult<Vec<u8>> + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> StorageResult<Value> + Send + Sync;

/// Codec assembled from a pair of closures.
#[derive(Clone)]
pub struct FnCodec {
    encode: Arc<EncodeFn>,
    decode: Arc<DecodeFn>,
}

impl FnCodec {
    pub fn new<E, D>(encode: E, decode: D) -> Self
    where
        E: Fn(&Value) -> StorageResult<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&[u8]) -> StorageResult<Value> + Send + Sync + 'static,
    {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }
}

impl ValueCodec for FnCodec {
    fn encode(&self, value: &Value) -> StorageResult<Vec<u8>> {
        (self.encode)(value)
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<Value> {
        (self.decode)(bytes)
    }
}

impl fmt::Debug for FnCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCodec").finish_non_exhaustive()
    }
}

/// Decodes bytes that must be UTF-8 text.
pub(crate) fn utf8(bytes: &[u8]) -> StorageResult<&str> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_preserves_shapes() {
        let codec = JsonCodec;
        for value in [
            json!(null),
            json!(true),
            json!(-12.5),
            json!("text"),
            json!([1, "two", {"three": 3}]),
            json!({"nested": {"list": [1, 2, 3]}}),
        ] {
            let bytes = codec.encode(&value).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), value);
        }
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_fn_codec_uses_closures() {
        // stores strings reversed
        let codec = FnCodec::new(
            |value| {
                let s = value.as_str().unwrap_or_default();
                Ok(s.chars().rev().collect::<String>().into_bytes())
            },
            |bytes| Ok(Value::String(utf8(bytes)?.chars().rev().collect())),
        );

        let bytes = codec.encode(&json!("abc")).unwrap();
        assert_eq!(bytes, b"cba");
        assert_eq!(codec.decode(&bytes).unwrap(), json!("abc"));
    }
}
