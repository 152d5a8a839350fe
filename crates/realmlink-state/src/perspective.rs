//! All slot and orientation logic lives here.
//!
//! The canonical state is host-centric on both peers: `player` is the host
//! and `opponent` is the guest. Each UI wants a me-first view instead, and
//! slot-relative payloads cross the wire in the sender's me-first frame.
//! [`swap_perspective`] and [`Perspective`] convert between the two.

use realmlink_protocol::{Card, Role, SerializedGameState, Slot};

use crate::Action;

/// Exchanges every player-slot field with its opponent counterpart and
/// flips `current_turn`. Shared fields (board, vertices, turn number,
/// harbinger marks) are untouched.
///
/// Applying it twice yields the input.
pub fn swap_perspective(state: &SerializedGameState) -> SerializedGameState {
    let mut swapped = state.clone();
    std::mem::swap(&mut swapped.player, &mut swapped.opponent);
    swapped.current_turn = state.current_turn.swapped();
    swapped
}

/// Replaces `slot`'s hand and both decks with hidden placeholders that keep
/// ids and order. Graveyard, casting stack and collection stay public.
pub fn redact_private(state: &SerializedGameState, slot: Slot) -> SerializedGameState {
    let mut redacted = state.clone();
    let zones = redacted.zones_mut(slot);
    for pile in [&mut zones.hand, &mut zones.site_deck, &mut zones.spell_deck] {
        *pile = pile.iter().map(Card::redacted).collect();
    }
    redacted
}

/// One peer's orientation relative to the canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perspective {
    role: Role,
}

impl Perspective {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(self) -> Role {
        self.role
    }

    /// Canonical slot of a slot in this peer's me-first frame.
    pub fn to_canonical(self, slot: Slot) -> Slot {
        match self.role {
            Role::Host => slot,
            Role::Guest => slot.swapped(),
        }
    }

    /// Me-first slot of a canonical slot. Inverse of
    /// [`to_canonical`](Self::to_canonical).
    pub fn from_canonical(self, slot: Slot) -> Slot {
        // Both mappings are involutions, so they coincide.
        self.to_canonical(slot)
    }

    /// Canonical slot of a slot the remote peer sent in its own me-first
    /// frame: swap into our me-first frame, then map to canonical.
    pub fn remote_to_canonical(self, slot: Slot) -> Slot {
        self.to_canonical(slot.swapped())
    }

    /// This peer's own canonical seat.
    pub fn local_slot(self) -> Slot {
        self.role.local_slot()
    }

    /// This peer's me-first view of the canonical state.
    pub fn view(self, canonical: &SerializedGameState) -> SerializedGameState {
        match self.role {
            Role::Host => canonical.clone(),
            Role::Guest => swap_perspective(canonical),
        }
    }

    /// A local (me-first) action in canonical slots.
    pub fn action_to_canonical(self, action: Action) -> Action {
        action.map_slots(|slot| self.to_canonical(slot))
    }

    /// A remote (sender me-first) action in canonical slots.
    pub fn remote_action_to_canonical(self, action: Action) -> Action {
        action.map_slots(|slot| self.remote_to_canonical(slot))
    }
}
