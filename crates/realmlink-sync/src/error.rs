//! Error types for the sync layer.

use realmlink_protocol::Slot;

/// Errors from the turn-order and harbinger protocols.
///
/// Broadcast and reconciliation don't fail: an unacknowledged frame stays
/// visible in the pending set, and an ambiguous reconnect falls back to the
/// host's placeholders.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Only the winner of the turn-order roll may choose who starts.
    #[error("{0} did not win the turn-order roll")]
    NotRollWinner(Slot),

    /// The roll hasn't produced a winner yet.
    #[error("turn-order roll is still pending")]
    RollPending,

    /// A harbinger draw that isn't 3 distinct dice on the board.
    #[error("invalid harbinger draw: {0}")]
    InvalidDraw(String),
}
