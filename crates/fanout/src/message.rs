//! Message trait for typed, self-describing messages.
//!
//! Every value that may cross a node boundary implements [`Message`]. The
//! wire format is a tag prefix followed by a postcard payload:
//!
//! ```text
//! [tag_len: u16 LE][tag: utf8][payload: postcard]
//! ```
//!
//! The tag is what lets a receiver try several shapes in order and fall
//! through cleanly when none of them match.
//!
//! Values sent to a process on the same node are never encoded; they travel
//! boxed and are recovered by downcasting. See [`crate::runtime::Envelope`].
//!
//! # Example
//!
//! ```ignore
//! use fanout::message::Message;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Tick(u64);
//!
//! fanout::impl_message!(Tick, "Tick");
//!
//! let bytes = Tick(1).encode()?;
//! let (tag, _) = fanout::message::decode_tag(&bytes)?;
//! assert_eq!(tag, "Tick");
//! ```

use crate::core::DecodeError;
use serde::{Serialize, de::DeserializeOwned};
use std::borrow::Cow;
use thiserror::Error;

/// A value could not be encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("encode error: {0}")]
pub struct EncodeError(pub String);

/// Encode a value using postcard.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    postcard::to_allocvec(value).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a value using postcard.
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    postcard::from_bytes(bytes).map_err(|e| DecodeError::Postcard(e.to_string()))
}

/// Trait for typed, self-describing messages.
///
/// Implement it with [`impl_message!`](crate::impl_message) for any
/// serde type.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// The unique tag identifying this message type on the wire.
    ///
    /// Generic types build theirs from their parameters' tags, so
    /// `Publish<u64>` and `Publish<String>` never match each other.
    fn tag() -> Cow<'static, str>;

    /// Encode with the tag prefix.
    fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(encode_with_tag(&Self::tag(), &encode_payload(self)?))
    }

    /// Decode a tagged message, rejecting other tags.
    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (tag, payload) = decode_tag(bytes)?;
        let expected = Self::tag();
        if tag != expected {
            return Err(DecodeError::TagMismatch {
                expected: expected.into_owned(),
                found: tag.to_string(),
            });
        }
        decode_payload(payload)
    }
}

/// Extract the tag and payload from an encoded message.
pub fn decode_tag(bytes: &[u8]) -> Result<(&str, &[u8]), DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::InvalidData("message too short".into()));
    }

    let tag_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;

    if bytes.len() < 2 + tag_len {
        return Err(DecodeError::InvalidData(
            "tag length exceeds message".into(),
        ));
    }

    let tag = std::str::from_utf8(&bytes[2..2 + tag_len])
        .map_err(|_| DecodeError::InvalidData("invalid utf8 in tag".into()))?;

    Ok((tag, &bytes[2 + tag_len..]))
}

/// Encode a tag and payload into the wire format.
pub fn encode_with_tag(tag: &str, payload: &[u8]) -> Vec<u8> {
    let tag_bytes = tag.as_bytes();
    let tag_len = tag_bytes.len() as u16;

    let mut bytes = Vec::with_capacity(2 + tag_bytes.len() + payload.len());
    bytes.extend_from_slice(&tag_len.to_le_bytes());
    bytes.extend_from_slice(tag_bytes);
    bytes.extend_from_slice(payload);
    bytes
}

/// Implement [`Message`] for a serde type with the given tag.
#[macro_export]
macro_rules! impl_message {
    ($t:ty, $tag:expr) => {
        impl $crate::message::Message for $t {
            fn tag() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($tag)
            }
        }
    };
}

impl_message!((), "unit");
impl_message!(i32, "i32");
impl_message!(i64, "i64");
impl_message!(u32, "u32");
impl_message!(u64, "u64");
impl_message!(f64, "f64");
impl_message!(bool, "bool");
impl_message!(String, "String");
impl_message!(Vec<u8>, "bytes");

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestMsg {
        value: i32,
    }

    impl_message!(TestMsg, "TestMsg");

    #[test]
    fn test_encode_decode() {
        let bytes = TestMsg { value: 42 }.encode().unwrap();

        let (tag, _payload) = decode_tag(&bytes).unwrap();
        assert_eq!(tag, "TestMsg");

        let decoded = TestMsg::decode(&bytes).unwrap();
        assert_eq!(decoded.value, 42);
    }

    #[test]
    fn test_decode_rejects_other_tag() {
        let bytes = "hello".to_string().encode().unwrap();
        match TestMsg::decode(&bytes) {
            Err(DecodeError::TagMismatch { expected, found }) => {
                assert_eq!(expected, "TestMsg");
                assert_eq!(found, "String");
            }
            other => panic!("expected tag mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_tag_errors() {
        assert!(decode_tag(&[]).is_err());
        assert!(decode_tag(&[0]).is_err());
        assert!(decode_tag(&[10, 0]).is_err());
    }

    #[test]
    fn test_unit_message() {
        let bytes = ().encode().unwrap();
        let (tag, payload) = decode_tag(&bytes).unwrap();
        assert_eq!(tag, "unit");
        assert!(payload.is_empty());
    }
}
