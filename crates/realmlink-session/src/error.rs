//! Error types for the session layer.

use crate::ConnectionStatus;
use crate::GameCode;

/// Errors that can occur during session management.
///
/// These cover the lifecycle of one match session: creating or joining
/// it, moving through the connection state machine, persisting identity,
/// and talking to the directory service.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The string is not a 6-character code from the game-code alphabet.
    #[error("invalid game code: {0:?}")]
    InvalidCode(String),

    /// An operation needs a session but none exists.
    /// This happens after `leave()` or before `create()`/`join()`.
    #[error("no active session")]
    NoSession,

    /// `create()` or `join()` while a session is still alive.
    /// Leave first, or resume the existing one.
    #[error("already in session {0}")]
    AlreadyInSession(GameCode),

    /// The connection state machine doesn't allow this step.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionStatus,
        to: ConnectionStatus,
    },

    /// The operation is reserved for the host.
    #[error("only the host can do this")]
    NotHost,

    /// The directory has no listing for this code.
    #[error("game {0} not found")]
    GameNotFound(GameCode),

    /// The listing exists but is no longer accepting a guest.
    #[error("game {0} is not open for joining")]
    GameUnavailable(GameCode),

    /// Create/join/resume gave up after the configured number of attempts.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The key-value store refused a read or write.
    #[error("store error: {0}")]
    Store(String),

    /// A persisted record could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
