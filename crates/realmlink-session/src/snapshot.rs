//! The guest's private-zone snapshot, persisted locally and pushed to the
//! directory so a reloaded guest can get its own hand and deck order back.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use realmlink_protocol::{Card, PlayerZones};

use crate::store::{KeyValueStore, load_json, save_json};
use crate::{GameCode, SessionError};

/// Storage key of the single local snapshot record.
pub const SNAPSHOT_KEY: &str = "realmlink.privateSnapshot";

/// Default age after which a snapshot is ignored.
pub const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// The guest's own hidden zones at one point in time.
///
/// Field names keep the canonical slot they came from: the guest sits in
/// the `opponent` slot of the host-centric state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateSnapshot {
    pub game_code: GameCode,
    pub opponent_hand: Vec<Card>,
    pub opponent_site_deck: Vec<Card>,
    pub opponent_spell_deck: Vec<Card>,
    pub opponent_graveyard: Vec<Card>,
    #[serde(default)]
    pub opponent_collection: Vec<Card>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl PrivateSnapshot {
    pub fn capture(game_code: GameCode, zones: &PlayerZones, timestamp: u64) -> Self {
        Self {
            game_code,
            opponent_hand: zones.hand.clone(),
            opponent_site_deck: zones.site_deck.clone(),
            opponent_spell_deck: zones.spell_deck.clone(),
            opponent_graveyard: zones.graveyard.clone(),
            opponent_collection: zones.collection.clone(),
            timestamp,
        }
    }

    /// `true` when the snapshot belongs to `code` and is younger than
    /// `max_age` at `now_ms`.
    pub fn is_valid_for(&self, code: &GameCode, now_ms: u64, max_age: Duration) -> bool {
        let age = now_ms.saturating_sub(self.timestamp);
        self.game_code == *code && u128::from(age) < max_age.as_millis()
    }

    /// `true` when at least one private zone holds a card.
    pub fn has_cards(&self) -> bool {
        !(self.opponent_hand.is_empty()
            && self.opponent_site_deck.is_empty()
            && self.opponent_spell_deck.is_empty()
            && self.opponent_graveyard.is_empty())
    }

    /// Writes the snapshot's zones over `zones`. Counters and public piles
    /// are left alone.
    pub fn restore_into(&self, zones: &mut PlayerZones) {
        zones.hand = self.opponent_hand.clone();
        zones.site_deck = self.opponent_site_deck.clone();
        zones.spell_deck = self.opponent_spell_deck.clone();
        zones.graveyard = self.opponent_graveyard.clone();
        zones.collection = self.opponent_collection.clone();
    }
}

/// Supersedes any previous local snapshot.
pub fn save_snapshot(
    store: &dyn KeyValueStore,
    snapshot: &PrivateSnapshot,
) -> Result<(), SessionError> {
    save_json(store, SNAPSHOT_KEY, snapshot)
}

pub fn load_snapshot(store: &dyn KeyValueStore) -> Result<Option<PrivateSnapshot>, SessionError> {
    load_json(store, SNAPSHOT_KEY)
}

pub fn clear_snapshot(store: &dyn KeyValueStore) -> Result<(), SessionError> {
    store.delete(SNAPSHOT_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use realmlink_protocol::CardKind;

    fn code() -> GameCode {
        GameCode::parse("ABCDEF").unwrap()
    }

    fn zones_with_hand(n: usize) -> PlayerZones {
        let mut zones = PlayerZones::default();
        zones.hand = (0..n)
            .map(|i| Card::new(format!("h-{i}"), "Card", CardKind::Spell))
            .collect();
        zones
    }

    #[test]
    fn test_snapshot_json_field_names() {
        let snap = PrivateSnapshot::capture(code(), &zones_with_hand(1), 5);
        let json: serde_json::Value = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["gameCode"], "ABCDEF");
        assert!(json["opponentHand"].is_array());
        assert!(json["opponentSiteDeck"].is_array());
        assert_eq!(json["timestamp"], 5);
    }

    #[test]
    fn test_is_valid_for_checks_code_and_age() {
        let snap = PrivateSnapshot::capture(code(), &zones_with_hand(1), 1_000);
        let hour = SNAPSHOT_MAX_AGE;
        assert!(snap.is_valid_for(&code(), 1_000 + 59 * 60 * 1_000, hour));
        assert!(!snap.is_valid_for(&code(), 1_000 + 61 * 60 * 1_000, hour));
        let other = GameCode::parse("ZZZZZZ").unwrap();
        assert!(!snap.is_valid_for(&other, 1_000, hour));
    }

    #[test]
    fn test_save_supersedes_previous() {
        let store = MemoryStore::new();
        save_snapshot(&store, &PrivateSnapshot::capture(code(), &zones_with_hand(1), 1)).unwrap();
        save_snapshot(&store, &PrivateSnapshot::capture(code(), &zones_with_hand(3), 2)).unwrap();
        let loaded = load_snapshot(&store).unwrap().unwrap();
        assert_eq!(loaded.opponent_hand.len(), 3);
        assert_eq!(loaded.timestamp, 2);
    }

    #[test]
    fn test_restore_into_keeps_counters() {
        let snap = PrivateSnapshot::capture(code(), &zones_with_hand(2), 0);
        let mut zones = PlayerZones::default();
        zones.life = 9;
        snap.restore_into(&mut zones);
        assert_eq!(zones.hand.len(), 2);
        assert_eq!(zones.life, 9);
    }
}
