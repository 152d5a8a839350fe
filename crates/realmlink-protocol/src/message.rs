//! The closed message vocabulary exchanged between the two peers.
//!
//! Every frame on the wire is one [`Message`]: a JSON object whose `type`
//! field names the variant in snake_case, with the variant's fields in
//! camelCase next to it:
//!
//! ```text
//! { "type": "action", "action": { "name": "moveCard", ... }, "sequence": 5 }
//! { "type": "ack", "sequence": 5 }
//! ```
//!
//! The protocol is versionless. Unknown fields are ignored by serde, and new
//! variants are additive: an old peer drops a `type` it doesn't know (see
//! [`decode_message`](crate::decode_message)) instead of failing the session.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Card, CellPos, DeckType, PeerId, SerializedGameState, Slot};
use crate::ProtocolError;

/// Lowest face of every die the protocol rolls.
pub const DIE_MIN: u8 = 1;
/// Highest face of the turn-order die and of each harbinger die.
pub const DIE_MAX: u8 = 20;
/// Number of dice in a harbinger draw.
pub const HARBINGER_DICE: usize = 3;

/// A named local mutation, as it travels inside an `action` message.
///
/// The payload stays opaque JSON at this layer. The state layer parses it
/// into a typed mutator keyed by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Sender's wall clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A frame exchanged between host and guest.
///
/// `rename_all_fields` keeps Rust field names snake_case while the wire
/// stays camelCase (`peer_id` ↔ `peerId`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Message {
    // -- Handshake ----------------------------------------------------------
    /// Sent by both sides right after the transport connects.
    Hello { nickname: String, peer_id: PeerId },

    /// Host → guest once turn order is settled.
    GameStart {
        host_goes_first: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nickname: Option<String>,
    },

    // -- Reliable state ---------------------------------------------------
    /// Host → guest: complete authoritative snapshot.
    FullSync {
        state: Box<SerializedGameState>,
        sequence: u64,
    },

    /// A mutation the sender already applied locally.
    Action { action: ActionRecord, sequence: u64 },

    /// Receipt for an `action` or `full_sync` with the same sequence.
    Ack { sequence: u64 },

    EndTurn,

    // -- Table talk -------------------------------------------------------
    Chat { message: String, timestamp: u64 },

    /// A free-form die roll shown in the log.
    Roll {
        max: u32,
        result: u32,
        nickname: String,
        timestamp: u64,
    },

    /// The sender is (or stopped) looking through one of its decks.
    SearchingDeck {
        player: Slot,
        deck_type: DeckType,
        searching: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },

    RevealHand { cards: Vec<Card>, nickname: String },

    /// Board-relative pointer ping; both coordinates are fractions in 0–1.
    Ping { x: f64, y: f64 },

    // -- Turn order -------------------------------------------------------
    DiceRollStart,
    DiceRollResult { result: u8 },
    TurnChoice { starts_first: bool },

    // -- Harbinger draw ---------------------------------------------------
    HarbingerDiceStart { player: Slot },
    HarbingerDiceResult { rolls: Vec<u8>, positions: Vec<CellPos> },

    // -- Visual only ------------------------------------------------------
    DragStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card_id: Option<String>,
    },
    DragMove { x: f64, y: f64 },
    DragEnd,

    // -- Match lifecycle --------------------------------------------------
    Concede,
    RematchRequest,
    RematchAccept,
}

/// The bare discriminant of a [`Message`], used for logging and for
/// checking the `type` field before decoding the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    GameStart,
    FullSync,
    Action,
    Ack,
    EndTurn,
    Chat,
    Roll,
    SearchingDeck,
    RevealHand,
    Ping,
    DiceRollStart,
    DiceRollResult,
    TurnChoice,
    HarbingerDiceStart,
    HarbingerDiceResult,
    DragStart,
    DragMove,
    DragEnd,
    Concede,
    RematchRequest,
    RematchAccept,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 22] = [
        Self::Hello,
        Self::GameStart,
        Self::FullSync,
        Self::Action,
        Self::Ack,
        Self::EndTurn,
        Self::Chat,
        Self::Roll,
        Self::SearchingDeck,
        Self::RevealHand,
        Self::Ping,
        Self::DiceRollStart,
        Self::DiceRollResult,
        Self::TurnChoice,
        Self::HarbingerDiceStart,
        Self::HarbingerDiceResult,
        Self::DragStart,
        Self::DragMove,
        Self::DragEnd,
        Self::Concede,
        Self::RematchRequest,
        Self::RematchAccept,
    ];

    /// The literal `type` tag on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::GameStart => "game_start",
            Self::FullSync => "full_sync",
            Self::Action => "action",
            Self::Ack => "ack",
            Self::EndTurn => "end_turn",
            Self::Chat => "chat",
            Self::Roll => "roll",
            Self::SearchingDeck => "searching_deck",
            Self::RevealHand => "reveal_hand",
            Self::Ping => "ping",
            Self::DiceRollStart => "dice_roll_start",
            Self::DiceRollResult => "dice_roll_result",
            Self::TurnChoice => "turn_choice",
            Self::HarbingerDiceStart => "harbinger_dice_start",
            Self::HarbingerDiceResult => "harbinger_dice_result",
            Self::DragStart => "drag_start",
            Self::DragMove => "drag_move",
            Self::DragEnd => "drag_end",
            Self::Concede => "concede",
            Self::RematchRequest => "rematch_request",
            Self::RematchAccept => "rematch_accept",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Visual-only messages never touch match state.
    pub fn is_visual(self) -> bool {
        matches!(
            self,
            Self::Ping | Self::DragStart | Self::DragMove | Self::DragEnd
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Hello { .. } => MessageKind::Hello,
            Self::GameStart { .. } => MessageKind::GameStart,
            Self::FullSync { .. } => MessageKind::FullSync,
            Self::Action { .. } => MessageKind::Action,
            Self::Ack { .. } => MessageKind::Ack,
            Self::EndTurn => MessageKind::EndTurn,
            Self::Chat { .. } => MessageKind::Chat,
            Self::Roll { .. } => MessageKind::Roll,
            Self::SearchingDeck { .. } => MessageKind::SearchingDeck,
            Self::RevealHand { .. } => MessageKind::RevealHand,
            Self::Ping { .. } => MessageKind::Ping,
            Self::DiceRollStart => MessageKind::DiceRollStart,
            Self::DiceRollResult { .. } => MessageKind::DiceRollResult,
            Self::TurnChoice { .. } => MessageKind::TurnChoice,
            Self::HarbingerDiceStart { .. } => MessageKind::HarbingerDiceStart,
            Self::HarbingerDiceResult { .. } => MessageKind::HarbingerDiceResult,
            Self::DragStart { .. } => MessageKind::DragStart,
            Self::DragMove { .. } => MessageKind::DragMove,
            Self::DragEnd => MessageKind::DragEnd,
            Self::Concede => MessageKind::Concede,
            Self::RematchRequest => MessageKind::RematchRequest,
            Self::RematchAccept => MessageKind::RematchAccept,
        }
    }

    /// The reliable sequence number, for the two variants that carry one.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::FullSync { sequence, .. } | Self::Action { sequence, .. } => {
                Some(*sequence)
            }
            _ => None,
        }
    }

    /// Semantic checks that pass deserialization but break protocol rules.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] for out-of-range dice,
    /// pings outside the board, malformed harbinger draws, or an invalid
    /// `full_sync` state.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            Self::FullSync { state, .. } => state.validate(),
            Self::DiceRollResult { result } => check_die(*result),
            Self::Roll { max, result, .. } => {
                if *max == 0 || *result == 0 || result > max {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "roll result {result} outside 1..={max}"
                    )));
                }
                Ok(())
            }
            Self::Ping { x, y } => {
                if !(0.0..=1.0).contains(x) || !(0.0..=1.0).contains(y) {
                    return Err(ProtocolError::InvalidMessage(
                        "ping outside the board".into(),
                    ));
                }
                Ok(())
            }
            Self::HarbingerDiceResult { rolls, positions } => {
                if rolls.len() != HARBINGER_DICE || positions.len() != rolls.len() {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "harbinger draw needs {HARBINGER_DICE} rolls and positions"
                    )));
                }
                for roll in rolls {
                    check_die(*roll)?;
                }
                let distinct = rolls[0] != rolls[1]
                    && rolls[0] != rolls[2]
                    && rolls[1] != rolls[2];
                if !distinct {
                    return Err(ProtocolError::InvalidMessage(
                        "harbinger rolls must be distinct".into(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_die(value: u8) -> Result<(), ProtocolError> {
    if (DIE_MIN..=DIE_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidMessage(format!(
            "die result {value} outside {DIE_MIN}..={DIE_MAX}"
        )))
    }
}

// =========================================================================
// Tests
// =========================================================================
