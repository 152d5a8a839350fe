//! Wire protocol for Realmlink.
//!
//! This crate defines the "language" the two peers of a match speak:
//!
//! - **Types** ([`SerializedGameState`], [`Card`], [`Slot`], [`Role`], …):
//!   the data that travels inside messages.
//! - **Messages** ([`Message`], [`MessageKind`]): the closed set of frames.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`], [`decode_message`]): how
//!   frames are converted to and from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer has no behavior beyond (de)serialization. It sits
//! between the transport (bytes) and the sync layer (state):
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Sync (MatchState)
//! ```

mod codec;
mod error;
mod message;
mod types;

pub use codec::{Codec, decode_message};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{ActionRecord, DIE_MAX, DIE_MIN, HARBINGER_DICE, Message, MessageKind};
pub use types::{
    BOARD_CELLS, BOARD_COLS, BOARD_ROWS, Board, Card, CardId, CardKind, Cell, CellPos,
    DeckType, Element, HIDDEN_CARD_NAME, PeerId, PlayerZones, Role, STARTING_LIFE,
    SerializedGameState, Slot, Thresholds,
};
