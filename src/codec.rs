//! Request/response body encodings. Both carry the same structured value
//! model (`serde_json::Value`): JSON as the text form, MessagePack as the
//! binary form.

use serde_json::Value;

use crate::error::KeyturnError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    Json,
    Msgpack,
}

impl WireCodec {
    /// Codec for a `Content-Type` header value; parameters such as
    /// `charset` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case("application/json") {
            Some(Self::Json)
        } else if essence.eq_ignore_ascii_case("application/msgpack")
            || essence.eq_ignore_ascii_case("application/x-msgpack")
        {
            Some(Self::Msgpack)
        } else {
            None
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Msgpack => "application/msgpack",
        }
    }

    pub fn decode(self, body: &[u8]) -> Result<Value, KeyturnError> {
        Ok(match self {
            Self::Json => serde_json::from_slice(body)?,
            Self::Msgpack => rmp_serde::from_slice(body)?,
        })
    }

    /// Decode a request body that must be an array of commands.
    pub fn decode_batch(self, body: &[u8]) -> Result<Vec<Value>, KeyturnError> {
        match self.decode(body)? {
            Value::Array(items) => Ok(items),
            _ => Err(KeyturnError::NotABatch),
        }
    }

    pub fn encode(self, value: &Value) -> Result<Vec<u8>, KeyturnError> {
        Ok(match self {
            Self::Json => serde_json::to_vec(value)?,
            Self::Msgpack => rmp_serde::to_vec_named(value)?,
        })
    }
}
