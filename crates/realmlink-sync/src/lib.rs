//! Keeping two peers' match states in step.
//!
//! - [`Broadcaster`] / [`ReceiveWindow`]: numbered frames, acks, re-sends,
//!   and duplicate suppression.
//! - [`Reconciler`]: merges a host `full_sync` with the guest's own hidden
//!   zones after a reconnect.
//! - [`TurnOrderRoll`], [`first_seat`], [`HarbingerDraw`]: the dice
//!   protocols both sides must agree on.
//!
//! Nothing here touches the transport. The peer runtime feeds inbound
//! frames in and writes the frames these types produce.

mod broadcast;
mod consensus;
mod error;
mod reconcile;

pub use broadcast::{AckPolicy, Broadcaster, Delivery, PendingAcks, PendingEntry, ReceiveWindow};
pub use consensus::{
    HarbingerDraw, RollOutcome, TurnOrderRoll, first_seat, roll_die, roll_unique_triple,
};
pub use error::SyncError;
pub use reconcile::{ReconcilePolicy, Reconciler, Reconciliation, RestoreSource};
