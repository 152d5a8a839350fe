//! Error types for the protocol layer.
//!
//! Each crate in Realmlink defines its own error enum. A `ProtocolError`
//! always means a frame could not be turned into (or out of) a valid
//! [`Message`](crate::Message); the peer drops such frames and keeps the
//! connection open.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields,
    /// or wrong data types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame's `type` tag is not part of this protocol version.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// The message decoded but violates a protocol rule, e.g. a die result
    /// outside 1–20 or a board with the wrong number of cells.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
