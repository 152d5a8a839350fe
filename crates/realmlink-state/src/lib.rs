//! Canonical match state for Realmlink.
//!
//! - [`MatchState`]: the host-centric canonical state plus transient flags,
//!   mutated only through [`MatchState::apply`] and a few turn helpers.
//! - [`Action`]: the named mutators, parsed from wire records.
//! - [`Perspective`] / [`swap_perspective`]: every slot conversion.
//! - [`MatchLog`]: the per-peer log.

mod action;
mod error;
mod log;
mod perspective;
mod state;

pub use action::{Action, Zone};
pub use error::StateError;
pub use log::{LogEntry, LogKind, MatchLog, unix_millis};
pub use perspective::{Perspective, redact_private, swap_perspective};
pub use state::{MatchState, PingMark, RevealedHand, SearchStatus};
