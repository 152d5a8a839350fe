//! Core wire types: identities, cards, and the serialized match state.
//!
//! Everything in this module travels inside a [`Message`](crate::Message)
//! or is persisted to a store. Field names follow the camelCase JSON shape
//! the browser client already speaks.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Transport-level identity of one peer (the id the signaling layer knows
/// it by). Opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which side of the match a peer is on.
///
/// The host created the match and is authoritative for shared state. The
/// guest joined with the game code and is authoritative only for its own
/// private zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    /// The canonical slot this role occupies. The canonical state is
    /// host-centric, so the host is always `Player` and the guest is always
    /// `Opponent`.
    pub fn local_slot(self) -> Slot {
        match self {
            Self::Host => Slot::Player,
            Self::Guest => Slot::Opponent,
        }
    }

    pub fn is_host(self) -> bool {
        matches!(self, Self::Host)
    }

    pub fn other(self) -> Self {
        match self {
            Self::Host => Self::Guest,
            Self::Guest => Self::Host,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Guest => f.write_str("guest"),
        }
    }
}

/// One of the two fixed logical positions in a match state.
///
/// Slots are independent of host/guest: a state can be viewed in either
/// orientation, and the perspective transform swaps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Player,
    Opponent,
}

impl Slot {
    /// The other slot.
    pub fn swapped(self) -> Self {
        match self {
            Self::Player => Self::Opponent,
            Self::Opponent => Self::Player,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player => f.write_str("player"),
            Self::Opponent => f.write_str("opponent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cards
// ---------------------------------------------------------------------------

/// Name carried by placeholder cards that stand in for the other player's
/// hidden information.
pub const HIDDEN_CARD_NAME: &str = "Hidden";

/// Globally unique card instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub String);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Broad card category. Unknown categories from newer clients decode as
/// `Other` instead of failing the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Site,
    Spell,
    Avatar,
    Token,
    #[default]
    #[serde(other)]
    Other,
}

/// A card instance on the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    pub name: String,
    #[serde(default)]
    pub kind: CardKind,
    /// Rotation in degrees (0 = upright, 90 = tapped).
    #[serde(default)]
    pub rotation: u16,
    #[serde(default)]
    pub face_down: bool,
    #[serde(default)]
    pub counters: i32,
    /// Cards attached to this one. Attached cards live nowhere else.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Card>,
    /// The seat that owns the physical card, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Role>,
}

impl Card {
    /// Creates a face-up card with default table attributes.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: CardKind) -> Self {
        Self {
            id: CardId(id.into()),
            name: name.into(),
            kind,
            rotation: 0,
            face_down: false,
            counters: 0,
            attachments: Vec::new(),
            owner: None,
        }
    }

    /// An opaque placeholder that keeps only the id.
    pub fn hidden(id: CardId) -> Self {
        Self {
            id,
            name: HIDDEN_CARD_NAME.to_string(),
            kind: CardKind::Other,
            rotation: 0,
            face_down: true,
            counters: 0,
            attachments: Vec::new(),
            owner: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.name == HIDDEN_CARD_NAME
    }

    /// The placeholder version of this card (same id, nothing else).
    pub fn redacted(&self) -> Self {
        Self::hidden(self.id.clone())
    }
}

/// Which of a player's two decks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckType {
    Site,
    Spell,
}

/// The four elemental thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Air,
    Earth,
    Fire,
    Water,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Thresholds {
    pub air: u8,
    pub earth: u8,
    pub fire: u8,
    pub water: u8,
}

impl Thresholds {
    pub fn get(&self, element: Element) -> u8 {
        match element {
            Element::Air => self.air,
            Element::Earth => self.earth,
            Element::Fire => self.fire,
            Element::Water => self.water,
        }
    }

    pub fn set(&mut self, element: Element, value: u8) {
        match element {
            Element::Air => self.air = value,
            Element::Earth => self.earth = value,
            Element::Fire => self.fire = value,
            Element::Water => self.water = value,
        }
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

/// Rows on the realm grid.
pub const BOARD_ROWS: u8 = 4;
/// Columns on the realm grid.
pub const BOARD_COLS: u8 = 5;
/// Total number of sites on the grid.
pub const BOARD_CELLS: usize = BOARD_ROWS as usize * BOARD_COLS as usize;

/// A position on the 4×5 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellPos {
    pub row: u8,
    pub col: u8,
}

impl CellPos {
    pub fn new(row: u8, col: u8) -> Option<Self> {
        (row < BOARD_ROWS && col < BOARD_COLS).then_some(Self { row, col })
    }

    /// Row-major index into [`Board::cells`].
    pub fn index(self) -> usize {
        self.row as usize * BOARD_COLS as usize + self.col as usize
    }

    /// Maps a d20 result (1–20) to the grid in row-major order.
    pub fn from_roll(roll: u8) -> Option<Self> {
        if !(1..=BOARD_CELLS as u8).contains(&roll) {
            return None;
        }
        let idx = roll - 1;
        Self::new(idx / BOARD_COLS, idx % BOARD_COLS)
    }
}

impl fmt::Display for CellPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.row, self.col)
    }
}

/// One site on the grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    #[serde(default)]
    pub site: Option<Card>,
    #[serde(default)]
    pub units: Vec<Card>,
    #[serde(default)]
    pub under: Vec<Card>,
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        self.site.is_none() && self.units.is_empty() && self.under.is_empty()
    }
}

/// The realm grid, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    pub cells: Vec<Cell>,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            cells: vec![Cell::default(); BOARD_CELLS],
        }
    }
}

impl Board {
    pub fn cell(&self, pos: CellPos) -> Option<&Cell> {
        self.cells.get(pos.index())
    }

    pub fn cell_mut(&mut self, pos: CellPos) -> Option<&mut Cell> {
        self.cells.get_mut(pos.index())
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Serialized match state
// ---------------------------------------------------------------------------

/// Starting life total.
pub const STARTING_LIFE: i32 = 20;

/// Everything one slot owns: private zones, public piles, and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerZones {
    #[serde(default)]
    pub hand: Vec<Card>,
    #[serde(default)]
    pub site_deck: Vec<Card>,
    #[serde(default)]
    pub spell_deck: Vec<Card>,
    #[serde(default)]
    pub graveyard: Vec<Card>,
    #[serde(default)]
    pub casting_stack: Vec<Card>,
    /// Cards owned but outside the decks (sideboard, collection search).
    #[serde(default)]
    pub collection: Vec<Card>,
    pub life: i32,
    #[serde(default)]
    pub mana: i32,
    #[serde(default)]
    pub mana_total: i32,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl Default for PlayerZones {
    fn default() -> Self {
        Self {
            hand: Vec::new(),
            site_deck: Vec::new(),
            spell_deck: Vec::new(),
            graveyard: Vec::new(),
            casting_stack: Vec::new(),
            collection: Vec::new(),
            life: STARTING_LIFE,
            mana: 0,
            mana_total: 0,
            thresholds: Thresholds::default(),
        }
    }
}

impl PlayerZones {
    pub fn deck(&self, deck: DeckType) -> &Vec<Card> {
        match deck {
            DeckType::Site => &self.site_deck,
            DeckType::Spell => &self.spell_deck,
        }
    }

    pub fn deck_mut(&mut self, deck: DeckType) -> &mut Vec<Card> {
        match deck {
            DeckType::Site => &mut self.site_deck,
            DeckType::Spell => &mut self.spell_deck,
        }
    }

    /// `true` when no hidden-information zone holds a card.
    pub fn private_zones_empty(&self) -> bool {
        self.hand.is_empty()
            && self.site_deck.is_empty()
            && self.spell_deck.is_empty()
            && self.graveyard.is_empty()
    }
}

/// The canonical match state minus UI-transient flags. This is exactly
/// what a `full_sync` carries.
///
/// Orientation is host-centric: `player` is the host's slot and
/// `opponent` is the guest's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedGameState {
    #[serde(default)]
    pub board: Board,
    /// Units standing on grid vertices, keyed by vertex id (`"r-c"`).
    #[serde(default)]
    pub vertices: BTreeMap<String, Vec<Card>>,
    #[serde(default)]
    pub player: PlayerZones,
    #[serde(default)]
    pub opponent: PlayerZones,
    pub current_turn: Slot,
    pub turn_number: u32,
    /// Sites marked by the last harbinger draw.
    #[serde(default)]
    pub harbinger_positions: Vec<CellPos>,
}

impl Default for SerializedGameState {
    fn default() -> Self {
        Self {
            board: Board::default(),
            vertices: BTreeMap::new(),
            player: PlayerZones::default(),
            opponent: PlayerZones::default(),
            current_turn: Slot::Player,
            turn_number: 1,
            harbinger_positions: Vec::new(),
        }
    }
}

impl SerializedGameState {
    pub fn zones(&self, slot: Slot) -> &PlayerZones {
        match slot {
            Slot::Player => &self.player,
            Slot::Opponent => &self.opponent,
        }
    }

    pub fn zones_mut(&mut self, slot: Slot) -> &mut PlayerZones {
        match slot {
            Slot::Player => &mut self.player,
            Slot::Opponent => &mut self.opponent,
        }
    }

    /// `true` once anything has happened in the match: a later turn, or any
    /// card in a deck, hand, or on the board.
    pub fn has_progress(&self) -> bool {
        self.turn_number > 1
            || !self.player.private_zones_empty()
            || !self.opponent.private_zones_empty()
            || !self.board.is_empty()
            || self.vertices.values().any(|units| !units.is_empty())
    }

    /// Structural checks serde can't express.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] if the board is not 4×5,
    /// the turn number is zero, or a harbinger mark is off the grid.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.board.cells.len() != BOARD_CELLS {
            return Err(ProtocolError::InvalidMessage(format!(
                "board must have {BOARD_CELLS} cells, got {}",
                self.board.cells.len()
            )));
        }
        if self.turn_number == 0 {
            return Err(ProtocolError::InvalidMessage(
                "turn number starts at 1".into(),
            ));
        }
        if self
            .harbinger_positions
            .iter()
            .any(|p| CellPos::new(p.row, p.col).is_none())
        {
            return Err(ProtocolError::InvalidMessage(
                "harbinger position off the grid".into(),
            ));
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_local_slot_is_host_centric() {
        assert_eq!(Role::Host.local_slot(), Slot::Player);
        assert_eq!(Role::Guest.local_slot(), Slot::Opponent);
    }

    #[test]
    fn test_slot_serializes_lowercase() {
        let json = serde_json::to_string(&Slot::Opponent).unwrap();
        assert_eq!(json, "\"opponent\"");
    }

    #[test]
    fn test_card_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&CardId::from("c-1")).unwrap();
        assert_eq!(json, "\"c-1\"");
    }

    #[test]
    fn test_card_hidden_keeps_only_id() {
        let card = Card::new("c-9", "Pudge Butcher", CardKind::Spell);
        let hidden = card.redacted();
        assert_eq!(hidden.id, card.id);
        assert_eq!(hidden.name, HIDDEN_CARD_NAME);
        assert!(hidden.is_hidden());
        assert!(!card.is_hidden());
    }

    #[test]
    fn test_card_unknown_kind_decodes_as_other() {
        let json = r#"{"id":"x","name":"Relic","kind":"relic"}"#;
        let card: Card = serde_json::from_str(json).unwrap();
        assert_eq!(card.kind, CardKind::Other);
    }

    #[test]
    fn test_card_json_uses_camel_case() {
        let mut card = Card::new("c-1", "Spire", CardKind::Site);
        card.face_down = true;
        let json: serde_json::Value = serde_json::to_value(&card).unwrap();
        assert_eq!(json["faceDown"], true);
        assert!(json.get("attachments").is_none(), "empty attachments skipped");
    }

    #[test]
    fn test_cell_pos_from_roll_covers_grid() {
        assert_eq!(CellPos::from_roll(1), CellPos::new(0, 0));
        assert_eq!(CellPos::from_roll(5), CellPos::new(0, 4));
        assert_eq!(CellPos::from_roll(6), CellPos::new(1, 0));
        assert_eq!(CellPos::from_roll(20), CellPos::new(3, 4));
        assert_eq!(CellPos::from_roll(0), None);
        assert_eq!(CellPos::from_roll(21), None);
    }

    #[test]
    fn test_board_default_has_twenty_empty_cells() {
        let board = Board::default();
        assert_eq!(board.cells.len(), BOARD_CELLS);
        assert!(board.is_empty());
    }

    #[test]
    fn test_thresholds_get_set() {
        let mut t = Thresholds::default();
        t.set(Element::Fire, 3);
        assert_eq!(t.get(Element::Fire), 3);
        assert_eq!(t.get(Element::Water), 0);
    }

    #[test]
    fn test_state_default_has_no_progress() {
        let state = SerializedGameState::default();
        assert!(!state.has_progress());
        assert_eq!(state.current_turn, Slot::Player);
    }

    #[test]
    fn test_state_has_progress_after_turn_one() {
        let state = SerializedGameState {
            turn_number: 2,
            ..SerializedGameState::default()
        };
        assert!(state.has_progress());
    }

    #[test]
    fn test_state_has_progress_with_card_in_hand() {
        let mut state = SerializedGameState::default();
        state
            .opponent
            .hand
            .push(Card::new("c-1", "Sling", CardKind::Spell));
        assert!(state.has_progress());
    }

    #[test]
    fn test_state_validate_rejects_short_board() {
        let mut state = SerializedGameState::default();
        state.board.cells.truncate(3);
        assert!(matches!(
            state.validate(),
            Err(ProtocolError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_state_json_shape() {
        let json: serde_json::Value =
            serde_json::to_value(SerializedGameState::default()).unwrap();
        assert_eq!(json["currentTurn"], "player");
        assert_eq!(json["turnNumber"], 1);
        assert_eq!(json["player"]["life"], STARTING_LIFE);
        assert!(json["player"]["siteDeck"].is_array());
        assert_eq!(json["board"].as_array().unwrap().len(), BOARD_CELLS);
    }
}
