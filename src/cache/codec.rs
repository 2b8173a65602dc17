//! Value Codec Module
//!
//! Turns typed values into the textual payload every provider stores.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Failure to encode or decode a payload.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Converts typed values to and from a self-describing text payload.
///
/// A codec is picked once when a [`Cache`](crate::Cache) is built; there is no
/// runtime fallback between encoders.
pub trait ValueCodec: Send + Sync + 'static {
    /// Encodes `value`, returning `Ok(None)` when it encodes to a null value.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Option<String>, CodecError>;

    /// Decodes a payload previously produced by [`ValueCodec::encode`].
    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Option<String>, CodecError> {
        let json = serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        if json.is_null() {
            return Ok(None);
        }
        serde_json::to_string(&json)
            .map(Some)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, payload: &str) -> Result<T, CodecError> {
        serde_json::from_str(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
