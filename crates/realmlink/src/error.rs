//! Unified error type for Realmlink.

use realmlink_protocol::ProtocolError;
use realmlink_session::{ConnectionStatus, SessionError};
use realmlink_state::StateError;
use realmlink_sync::SyncError;
use realmlink_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `realmlink` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant lets `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RealmlinkError {
    /// A transport-level error (listen, dial, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (code, status transition, directory, store).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An action the match state refused.
    #[error(transparent)]
    State(#[from] StateError),

    /// A dice protocol step out of turn.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A match command that changes shared state, issued without a live
    /// link to the other peer.
    #[error("not connected to the other player (status: {0})")]
    NotConnected(ConnectionStatus),

    /// `accept_rematch` with no rematch request from the other player.
    #[error("the other player has not asked for a rematch")]
    NoRematchRequested,

    /// The peer task is gone; its handle can't reach it anymore.
    #[error("peer task stopped")]
    PeerStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let realmlink_err: RealmlinkError = err.into();
        assert!(matches!(realmlink_err, RealmlinkError::Transport(_)));
        assert!(realmlink_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let realmlink_err: RealmlinkError = err.into();
        assert!(matches!(realmlink_err, RealmlinkError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let realmlink_err: RealmlinkError = SessionError::NoSession.into();
        assert!(matches!(realmlink_err, RealmlinkError::Session(_)));
    }

    #[test]
    fn test_from_sync_error() {
        let realmlink_err: RealmlinkError = SyncError::RollPending.into();
        assert!(matches!(realmlink_err, RealmlinkError::Sync(_)));
        assert_eq!(realmlink_err.to_string(), "turn-order roll is still pending");
    }

    #[test]
    fn test_not_connected_names_the_status() {
        let err = RealmlinkError::NotConnected(ConnectionStatus::Reconnecting { attempt: 2 });
        assert!(err.to_string().starts_with("not connected to the other player"));
    }
}
