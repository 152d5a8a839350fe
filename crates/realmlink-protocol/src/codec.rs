//! Codec trait, the JSON implementation, and fail-closed message decoding.
//!
//! A codec converts between Rust values and raw frame bytes. The peer
//! runtime only needs something implementing [`Codec`]; [`JsonCodec`] is the
//! one the browser client speaks.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Message, MessageKind, ProtocolError};

/// Encodes Rust values to frame bytes and decodes them back.
///
/// `Send + Sync + 'static` because the codec lives inside the peer actor
/// task for the whole session.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use realmlink_protocol::{Codec, JsonCodec, Message};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&Message::Ack { sequence: 1 }).unwrap();
/// let decoded: Message = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, Message::Ack { sequence: 1 });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

// ---------------------------------------------------------------------------
// Message decoding
// ---------------------------------------------------------------------------

/// Just the discriminant of a frame. Every other field is ignored.
#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: String,
}

/// Decodes one frame into a [`Message`], checking the `type` tag first.
///
/// The tag is validated before any payload field is touched, so an unknown
/// variant from a newer peer is reported as [`ProtocolError::UnknownType`]
/// rather than as a confusing field error. After decoding, the message's
/// semantic rules are checked with [`Message::validate`].
///
/// # Errors
/// Any error means the frame must be dropped; none of them should close
/// the connection.
pub fn decode_message<C: Codec>(codec: &C, data: &[u8]) -> Result<Message, ProtocolError> {
    let probe: TypeProbe = codec.decode(data)?;
    if MessageKind::from_tag(&probe.kind).is_none() {
        return Err(ProtocolError::UnknownType(probe.kind));
    }
    let msg: Message = codec.decode(data)?;
    msg.validate()?;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_accepts_valid_frame() {
        let msg = decode_message(&JsonCodec, br#"{"type":"ack","sequence":5}"#).unwrap();
        assert_eq!(msg, Message::Ack { sequence: 5 });
    }

    #[test]
    fn test_decode_message_garbage_returns_decode_error() {
        let result = decode_message(&JsonCodec, b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_message_missing_type_returns_decode_error() {
        let result = decode_message(&JsonCodec, br#"{"sequence":5}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_message_unknown_type_is_reported_by_name() {
        let result = decode_message(&JsonCodec, br#"{"type":"fly_to_moon","speed":9000}"#);
        match result {
            Err(ProtocolError::UnknownType(tag)) => assert_eq!(tag, "fly_to_moon"),
            other => panic!("expected UnknownType, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_message_known_type_with_bad_fields_fails() {
        let result = decode_message(&JsonCodec, br#"{"type":"ack","sequence":"five"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_decode_message_runs_semantic_validation() {
        let result = decode_message(&JsonCodec, br#"{"type":"dice_roll_result","result":42}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    }
}
