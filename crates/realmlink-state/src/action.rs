//! Typed mutators keyed by their wire `name`.
//!
//! On the wire an action is an opaque [`ActionRecord`]. This module parses
//! the record into an [`Action`] and back. Names not listed here are
//! rejected, never guessed at.

use serde::{Deserialize, Serialize};

use realmlink_protocol::{ActionRecord, Card, CardId, CellPos, DeckType, Element, Slot};

use crate::StateError;

/// Where a card can be put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "zone", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Zone {
    Hand { player: Slot },
    SiteDeck { player: Slot },
    SpellDeck { player: Slot },
    Graveyard { player: Slot },
    CastingStack { player: Slot },
    Collection { player: Slot },
    /// The site slot of a cell. Holds at most one card.
    Site { pos: CellPos },
    /// A unit standing on a cell.
    Cell { pos: CellPos },
    /// Beneath a cell's site.
    Under { pos: CellPos },
    /// A unit standing on a grid vertex.
    Vertex { id: String },
}

impl Zone {
    fn map_slot(self, f: impl Fn(Slot) -> Slot) -> Self {
        match self {
            Self::Hand { player } => Self::Hand { player: f(player) },
            Self::SiteDeck { player } => Self::SiteDeck { player: f(player) },
            Self::SpellDeck { player } => Self::SpellDeck { player: f(player) },
            Self::Graveyard { player } => Self::Graveyard { player: f(player) },
            Self::CastingStack { player } => Self::CastingStack { player: f(player) },
            Self::Collection { player } => Self::Collection { player: f(player) },
            other => other,
        }
    }

    /// `true` for zones whose contents the other player may not see.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Self::Hand { .. } | Self::SiteDeck { .. } | Self::SpellDeck { .. }
        )
    }
}

fn one() -> usize {
    1
}

/// A named mutation of the match state.
///
/// Slots inside an action are relative to whoever holds it: the local UI
/// speaks its own me-first frame, the state applies canonical slots. See
/// [`Perspective`](crate::Perspective) for the conversions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "name",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Action {
    MoveCard {
        card_id: CardId,
        to: Zone,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        /// The card's face, sent when it leaves a private zone for a public
        /// one. The receiver only holds a placeholder for it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        card: Option<Card>,
    },
    DrawCard {
        player: Slot,
        deck: DeckType,
        #[serde(default = "one")]
        count: usize,
    },
    /// Reorders a deck to the exact order the shuffler produced.
    ShuffleDeck {
        player: Slot,
        deck: DeckType,
        order: Vec<CardId>,
    },
    RotateCard { card_id: CardId, rotation: u16 },
    FlipCard { card_id: CardId, face_down: bool },
    SetCounter { card_id: CardId, value: i32 },
    SetLife { player: Slot, value: i32 },
    SetMana {
        player: Slot,
        mana: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<i32>,
    },
    SetThreshold {
        player: Slot,
        element: Element,
        value: u8,
    },
    AttachCard { card_id: CardId, target_id: CardId },
    /// Replaces a deck wholesale, e.g. at match setup.
    LoadDeck {
        player: Slot,
        deck: DeckType,
        cards: Vec<Card>,
    },
}

impl Action {
    /// Every wire name this crate understands.
    pub const NAMES: [&'static str; 11] = [
        "moveCard",
        "drawCard",
        "shuffleDeck",
        "rotateCard",
        "flipCard",
        "setCounter",
        "setLife",
        "setMana",
        "setThreshold",
        "attachCard",
        "loadDeck",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::MoveCard { .. } => "moveCard",
            Self::DrawCard { .. } => "drawCard",
            Self::ShuffleDeck { .. } => "shuffleDeck",
            Self::RotateCard { .. } => "rotateCard",
            Self::FlipCard { .. } => "flipCard",
            Self::SetCounter { .. } => "setCounter",
            Self::SetLife { .. } => "setLife",
            Self::SetMana { .. } => "setMana",
            Self::SetThreshold { .. } => "setThreshold",
            Self::AttachCard { .. } => "attachCard",
            Self::LoadDeck { .. } => "loadDeck",
        }
    }

    /// Parses a wire record.
    ///
    /// # Errors
    /// [`StateError::UnknownAction`] for an unrecognized name,
    /// [`StateError::InvalidPayload`] when the payload doesn't fit it.
    pub fn from_record(record: &ActionRecord) -> Result<Self, StateError> {
        if !Self::NAMES.contains(&record.name.as_str()) {
            return Err(StateError::UnknownAction(record.name.clone()));
        }
        let tagged = serde_json::json!({
            "name": record.name,
            "payload": record.payload,
        });
        serde_json::from_value(tagged).map_err(|source| StateError::InvalidPayload {
            name: record.name.clone(),
            source,
        })
    }

    /// Builds the wire record for this action.
    pub fn to_record(&self, timestamp: u64) -> Result<ActionRecord, StateError> {
        let invalid = |source| StateError::InvalidPayload {
            name: self.name().to_string(),
            source,
        };
        let mut value = serde_json::to_value(self).map_err(invalid)?;
        let payload = value
            .get_mut("payload")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok(ActionRecord {
            name: self.name().to_string(),
            payload,
            timestamp,
        })
    }

    /// Rewrites every slot in the action through `f`.
    pub fn map_slots(self, f: impl Fn(Slot) -> Slot + Copy) -> Self {
        match self {
            Self::MoveCard {
                card_id,
                to,
                index,
                card,
            } => Self::MoveCard {
                card_id,
                to: to.map_slot(f),
                index,
                card,
            },
            Self::DrawCard { player, deck, count } => Self::DrawCard {
                player: f(player),
                deck,
                count,
            },
            Self::ShuffleDeck { player, deck, order } => Self::ShuffleDeck {
                player: f(player),
                deck,
                order,
            },
            Self::SetLife { player, value } => Self::SetLife {
                player: f(player),
                value,
            },
            Self::SetMana { player, mana, total } => Self::SetMana {
                player: f(player),
                mana,
                total,
            },
            Self::SetThreshold { player, element, value } => Self::SetThreshold {
                player: f(player),
                element,
                value,
            },
            Self::LoadDeck { player, deck, cards } => Self::LoadDeck {
                player: f(player),
                deck,
                cards,
            },
            other => other,
        }
    }

    /// The action with both slots exchanged.
    pub fn swapped(self) -> Self {
        self.map_slots(Slot::swapped)
    }

    /// The form safe to send to the other peer: loaded decks travel as
    /// hidden placeholders that keep ids and order.
    pub fn redacted(&self) -> Self {
        match self {
            Self::LoadDeck { player, deck, cards } => Self::LoadDeck {
                player: *player,
                deck: *deck,
                cards: cards.iter().map(Card::redacted).collect(),
            },
            other => other.clone(),
        }
    }
}
