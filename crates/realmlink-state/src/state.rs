//! The canonical match state and its mutators.

use std::collections::HashSet;

use realmlink_protocol::{
    Card, CardId, Cell, CellPos, DeckType, SerializedGameState, Slot,
};

use crate::action::{Action, Zone};
use crate::StateError;

/// Which of a player's decks someone is looking through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchStatus {
    pub player: Slot,
    pub deck: DeckType,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealedHand {
    pub nickname: String,
    pub cards: Vec<Card>,
}

/// Last board-relative pointer from the remote peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingMark {
    pub x: f64,
    pub y: f64,
}

/// Canonical state plus UI-transient flags.
///
/// Only [`serialized`](Self::serialized) travels in a `full_sync`; the
/// transient fields describe what the other player is doing right now and
/// are never persisted.
#[derive(Debug, Clone, Default)]
pub struct MatchState {
    game: SerializedGameState,
    pub searching: Option<SearchStatus>,
    pub revealed_hand: Option<RevealedHand>,
    pub last_ping: Option<PingMark>,
    /// Card the remote peer is dragging, if any.
    pub remote_drag: Option<Option<String>>,
    /// Seat that conceded, once someone has.
    pub conceded: Option<Slot>,
}

impl MatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_serialized(game: SerializedGameState) -> Self {
        Self {
            game,
            ..Self::default()
        }
    }

    pub fn serialized(&self) -> &SerializedGameState {
        &self.game
    }

    /// Direct access for merges that replace whole zones.
    pub fn serialized_mut(&mut self) -> &mut SerializedGameState {
        &mut self.game
    }

    /// Replaces the serialized part atomically. Transient flags survive.
    pub fn replace(&mut self, game: SerializedGameState) {
        self.game = game;
    }

    pub fn current_turn(&self) -> Slot {
        self.game.current_turn
    }

    pub fn turn_number(&self) -> u32 {
        self.game.turn_number
    }

    pub fn has_progress(&self) -> bool {
        self.game.has_progress()
    }

    /// Fresh match for a rematch: everything back to defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn clear_transient(&mut self) {
        self.searching = None;
        self.revealed_hand = None;
        self.last_ping = None;
        self.remote_drag = None;
    }

    /// Sets who moves first and restarts the turn count.
    pub fn set_first_turn(&mut self, first: Slot) {
        self.game.current_turn = first;
        self.game.turn_number = 1;
    }

    /// Passes the turn to the other slot.
    pub fn end_turn(&mut self) {
        self.game.current_turn = self.game.current_turn.swapped();
        self.game.turn_number += 1;
        tracing::debug!(
            turn = self.game.turn_number,
            current = %self.game.current_turn,
            "turn ended"
        );
    }

    pub fn set_harbinger_positions(&mut self, positions: Vec<CellPos>) {
        self.game.harbinger_positions = positions;
    }

    /// `true` when `slot` holds real cards in a private zone: at least one
    /// card, and none of them placeholders.
    pub fn has_known_private_zones(&self, slot: Slot) -> bool {
        let zones = self.game.zones(slot);
        let piles = [&zones.hand, &zones.site_deck, &zones.spell_deck, &zones.graveyard];
        !zones.private_zones_empty()
            && piles.iter().all(|pile| !pile.iter().any(Card::is_hidden))
    }

    // -----------------------------------------------------------------
    // Card lookup
    // -----------------------------------------------------------------

    pub fn find_card(&self, id: &CardId) -> Option<&Card> {
        let (piles, sites) = piles(&self.game);
        piles
            .into_iter()
            .find_map(|pile| find_in_pile(pile, id))
            .or_else(|| {
                sites.into_iter().flatten().find_map(|site| {
                    if site.id == *id {
                        Some(site)
                    } else {
                        find_in_pile(&site.attachments, id)
                    }
                })
            })
    }

    /// `true` if `id` sits in a hand or deck of either player.
    pub fn is_in_private_zone(&self, id: &CardId) -> bool {
        [&self.game.player, &self.game.opponent].into_iter().any(|zones| {
            [&zones.hand, &zones.site_deck, &zones.spell_deck]
                .into_iter()
                .any(|pile| find_in_pile(pile, id).is_some())
        })
    }

    /// Fills in the card's face for a move out of a private zone into a
    /// public one, so the other peer can replace its placeholder. Call
    /// before applying the move.
    pub fn revealing(&self, action: Action) -> Action {
        match action {
            Action::MoveCard {
                card_id,
                to,
                index,
                card: None,
            } if !to.is_private() && self.is_in_private_zone(&card_id) => {
                let card = self
                    .find_card(&card_id)
                    .filter(|card| !card.is_hidden())
                    .cloned();
                Action::MoveCard {
                    card_id,
                    to,
                    index,
                    card,
                }
            }
            other => other,
        }
    }

    fn find_card_mut(&mut self, id: &CardId) -> Option<&mut Card> {
        let (piles, sites) = piles_mut(&mut self.game);
        for pile in piles {
            if let Some(card) = find_in_pile_mut(pile, id) {
                return Some(card);
            }
        }
        for site in sites.into_iter().flatten() {
            if site.id == *id {
                return Some(site);
            }
            if let Some(card) = find_in_pile_mut(&mut site.attachments, id) {
                return Some(card);
            }
        }
        None
    }

    fn take_card(&mut self, id: &CardId) -> Option<Card> {
        let (piles, sites) = piles_mut(&mut self.game);
        for pile in piles {
            if let Some(card) = take_from_pile(pile, id) {
                return Some(card);
            }
        }
        for site in sites {
            if site.as_ref().is_some_and(|s| s.id == *id) {
                return site.take();
            }
            if let Some(card) = site
                .as_mut()
                .and_then(|s| take_from_pile(&mut s.attachments, id))
            {
                return Some(card);
            }
        }
        None
    }

    /// Every card id that occurs more than once anywhere in the state,
    /// attachments included. Sorted.
    pub fn duplicate_ids(&self) -> Vec<CardId> {
        let mut seen = HashSet::new();
        let mut dupes = Vec::new();
        let (piles, sites) = piles(&self.game);
        let mut stack: Vec<&Card> = piles.into_iter().flatten().collect();
        stack.extend(sites.into_iter().flatten());
        while let Some(card) = stack.pop() {
            if !seen.insert(&card.id) && !dupes.contains(&card.id) {
                dupes.push(card.id.clone());
            }
            stack.extend(card.attachments.iter());
        }
        dupes.sort();
        dupes
    }

    // -----------------------------------------------------------------
    // Mutators
    // -----------------------------------------------------------------

    /// Applies an action expressed in canonical slots.
    ///
    /// # Errors
    /// Returns a [`StateError`] and leaves the state unchanged if the
    /// action refers to something that doesn't exist or can't happen.
    pub fn apply(&mut self, action: &Action) -> Result<(), StateError> {
        tracing::trace!(name = action.name(), "applying action");
        match action {
            Action::MoveCard {
                card_id,
                to,
                index,
                card,
            } => self.move_card(card_id, to, *index, card.as_ref()),
            Action::DrawCard { player, deck, count } => self.draw_card(*player, *deck, *count),
            Action::ShuffleDeck { player, deck, order } => {
                self.shuffle_deck(*player, *deck, order)
            }
            Action::RotateCard { card_id, rotation } => {
                self.card_mut(card_id)?.rotation = rotation % 360;
                Ok(())
            }
            Action::FlipCard { card_id, face_down } => {
                self.card_mut(card_id)?.face_down = *face_down;
                Ok(())
            }
            Action::SetCounter { card_id, value } => {
                self.card_mut(card_id)?.counters = *value;
                Ok(())
            }
            Action::SetLife { player, value } => {
                self.game.zones_mut(*player).life = *value;
                Ok(())
            }
            Action::SetMana { player, mana, total } => {
                let zones = self.game.zones_mut(*player);
                zones.mana = *mana;
                if let Some(total) = total {
                    zones.mana_total = *total;
                }
                Ok(())
            }
            Action::SetThreshold { player, element, value } => {
                self.game.zones_mut(*player).thresholds.set(*element, *value);
                Ok(())
            }
            Action::AttachCard { card_id, target_id } => self.attach_card(card_id, target_id),
            Action::LoadDeck { player, deck, cards } => {
                *self.game.zones_mut(*player).deck_mut(*deck) = cards.clone();
                Ok(())
            }
        }
    }

    fn card_mut(&mut self, id: &CardId) -> Result<&mut Card, StateError> {
        self.find_card_mut(id)
            .ok_or_else(|| StateError::CardNotFound(id.clone()))
    }

    fn move_card(
        &mut self,
        id: &CardId,
        to: &Zone,
        index: Option<usize>,
        revealed: Option<&Card>,
    ) -> Result<(), StateError> {
        if revealed.is_some_and(|card| card.id != *id || to.is_private()) {
            return Err(StateError::RevealMismatch(id.clone()));
        }
        // Validate the destination before anything is removed.
        if let Zone::Site { pos } | Zone::Cell { pos } | Zone::Under { pos } = to {
            let cell = self.cell(*pos)?;
            if matches!(to, Zone::Site { .. })
                && cell.site.as_ref().is_some_and(|site| site.id != *id)
            {
                return Err(StateError::SiteOccupied(*pos));
            }
        }
        let mut card = self
            .take_card(id)
            .ok_or_else(|| StateError::CardNotFound(id.clone()))?;
        if let Some(face) = revealed.filter(|_| card.is_hidden()) {
            card = Card {
                attachments: std::mem::take(&mut card.attachments),
                ..face.clone()
            };
        }
        self.place(card, to, index)
    }

    fn place(&mut self, card: Card, to: &Zone, index: Option<usize>) -> Result<(), StateError> {
        let pile = match to {
            Zone::Site { pos } => {
                self.cell_mut(*pos)?.site = Some(card);
                return Ok(());
            }
            Zone::Hand { player } => &mut self.game.zones_mut(*player).hand,
            Zone::SiteDeck { player } => &mut self.game.zones_mut(*player).site_deck,
            Zone::SpellDeck { player } => &mut self.game.zones_mut(*player).spell_deck,
            Zone::Graveyard { player } => &mut self.game.zones_mut(*player).graveyard,
            Zone::CastingStack { player } => &mut self.game.zones_mut(*player).casting_stack,
            Zone::Collection { player } => &mut self.game.zones_mut(*player).collection,
            Zone::Cell { pos } => &mut self.cell_mut(*pos)?.units,
            Zone::Under { pos } => &mut self.cell_mut(*pos)?.under,
            Zone::Vertex { id } => self.game.vertices.entry(id.clone()).or_default(),
        };
        let at = index.unwrap_or(pile.len()).min(pile.len());
        pile.insert(at, card);
        Ok(())
    }

    /// Moves the top `count` cards (front of the deck) into the hand.
    fn draw_card(&mut self, player: Slot, deck: DeckType, count: usize) -> Result<(), StateError> {
        let zones = self.game.zones_mut(player);
        if zones.deck(deck).len() < count {
            return Err(StateError::DeckEmpty {
                player,
                deck,
                wanted: count,
            });
        }
        let drawn: Vec<Card> = zones.deck_mut(deck).drain(..count).collect();
        zones.hand.extend(drawn);
        Ok(())
    }

    fn shuffle_deck(
        &mut self,
        player: Slot,
        deck: DeckType,
        order: &[CardId],
    ) -> Result<(), StateError> {
        let pile = self.game.zones_mut(player).deck_mut(deck);
        let distinct: HashSet<&CardId> = order.iter().collect();
        if order.len() != pile.len() || distinct.len() != order.len() {
            return Err(StateError::BadShuffle(format!(
                "{} ids for {} cards",
                distinct.len(),
                pile.len()
            )));
        }
        let mut reordered = Vec::with_capacity(pile.len());
        for id in order {
            let card = pile
                .iter()
                .find(|card| card.id == *id)
                .ok_or_else(|| StateError::BadShuffle(format!("{id} is not in the deck")))?;
            reordered.push(card.clone());
        }
        *pile = reordered;
        Ok(())
    }

    fn attach_card(&mut self, id: &CardId, target: &CardId) -> Result<(), StateError> {
        if id == target {
            return Err(StateError::SelfAttach(id.clone()));
        }
        let card = self
            .find_card(id)
            .ok_or_else(|| StateError::CardNotFound(id.clone()))?;
        // A card can't be attached to something hanging off itself.
        if find_in_pile(&card.attachments, target).is_some() || self.find_card(target).is_none() {
            return Err(StateError::CardNotFound(target.clone()));
        }
        let card = self
            .take_card(id)
            .ok_or_else(|| StateError::CardNotFound(id.clone()))?;
        self.card_mut(target)?.attachments.push(card);
        Ok(())
    }

    fn cell(&self, pos: CellPos) -> Result<&Cell, StateError> {
        self.game.board.cell(pos).ok_or(StateError::InvalidPosition {
            row: pos.row,
            col: pos.col,
        })
    }

    fn cell_mut(&mut self, pos: CellPos) -> Result<&mut Cell, StateError> {
        self.game.board.cell_mut(pos).ok_or(StateError::InvalidPosition {
            row: pos.row,
            col: pos.col,
        })
    }
}

// ---------------------------------------------------------------------------
// Pile traversal
// ---------------------------------------------------------------------------

type Piles<'a> = (Vec<&'a Vec<Card>>, Vec<&'a Option<Card>>);
type PilesMut<'a> = (Vec<&'a mut Vec<Card>>, Vec<&'a mut Option<Card>>);

/// Every card pile in the state, plus every site slot.
fn piles(game: &SerializedGameState) -> Piles<'_> {
    let mut piles = Vec::new();
    for zones in [&game.player, &game.opponent] {
        piles.extend([
            &zones.hand,
            &zones.site_deck,
            &zones.spell_deck,
            &zones.graveyard,
            &zones.casting_stack,
            &zones.collection,
        ]);
    }
    let mut sites = Vec::new();
    for Cell { site, units, under } in &game.board.cells {
        piles.push(units);
        piles.push(under);
        sites.push(site);
    }
    piles.extend(game.vertices.values());
    (piles, sites)
}

fn piles_mut(game: &mut SerializedGameState) -> PilesMut<'_> {
    let mut piles = Vec::new();
    for zones in [&mut game.player, &mut game.opponent] {
        piles.extend([
            &mut zones.hand,
            &mut zones.site_deck,
            &mut zones.spell_deck,
            &mut zones.graveyard,
            &mut zones.casting_stack,
            &mut zones.collection,
        ]);
    }
    let mut sites = Vec::new();
    for Cell { site, units, under } in &mut game.board.cells {
        piles.push(units);
        piles.push(under);
        sites.push(site);
    }
    piles.extend(game.vertices.values_mut());
    (piles, sites)
}

fn find_in_pile<'a>(pile: &'a [Card], id: &CardId) -> Option<&'a Card> {
    pile.iter().find_map(|card| {
        if card.id == *id {
            Some(card)
        } else {
            find_in_pile(&card.attachments, id)
        }
    })
}

fn find_in_pile_mut<'a>(pile: &'a mut [Card], id: &CardId) -> Option<&'a mut Card> {
    for card in pile {
        if card.id == *id {
            return Some(card);
        }
        if let Some(found) = find_in_pile_mut(&mut card.attachments, id) {
            return Some(found);
        }
    }
    None
}

fn take_from_pile(pile: &mut Vec<Card>, id: &CardId) -> Option<Card> {
    if let Some(i) = pile.iter().position(|card| card.id == *id) {
        return Some(pile.remove(i));
    }
    pile.iter_mut()
        .find_map(|card| take_from_pile(&mut card.attachments, id))
}
