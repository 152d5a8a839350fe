//! Dice protocols both peers must agree on.
//!
//! # Turn order
//!
//! Either peer sends `dice_roll_start`; each side rolls one d20 and sends
//! `dice_roll_result`. The higher roll wins, a tie sends both sides back to
//! rolling. The winner sends `turn_choice{startsFirst}` and both peers run
//! [`first_seat`] on the chooser's role, so they land on the same seat
//! without another round trip.
//!
//! # Harbinger draw
//!
//! The initiator rolls three distinct d20s ([`roll_unique_triple`]) and
//! broadcasts them with their grid positions. The receiver applies the
//! positions as sent.

use rand::Rng;
use realmlink_protocol::{CellPos, DIE_MAX, DIE_MIN, HARBINGER_DICE, Role, Slot};

use crate::SyncError;

/// The seat that moves first, given who chose and what they chose.
///
/// | chooser | starts_first | first seat |
/// |---------|--------------|------------|
/// | host    | true         | host       |
/// | host    | false        | guest      |
/// | guest   | true         | guest      |
/// | guest   | false        | host       |
pub fn first_seat(chooser_is_host: bool, starts_first: bool) -> Slot {
    let chooser = if chooser_is_host { Role::Host } else { Role::Guest };
    let first = if starts_first { chooser } else { chooser.other() };
    first.local_slot()
}

pub fn roll_die<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.random_range(DIE_MIN..=DIE_MAX)
}

// ---------------------------------------------------------------------------
// TurnOrderRoll
// ---------------------------------------------------------------------------

/// State of the turn-order roll from one peer's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOutcome {
    /// Waiting for one or both results.
    Pending,
    Won,
    Lost,
    /// Equal rolls: both sides reset and roll again.
    Tie,
}

/// One peer's view of the turn-order roll.
#[derive(Debug, Clone, Default)]
pub struct TurnOrderRoll {
    rolling: bool,
    local: Option<u8>,
    remote: Option<u8>,
    ties: u32,
    decided: Option<RollOutcome>,
    interrupted: bool,
}

impl TurnOrderRoll {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a round. Returns `false` if a round is already running, so a
    /// crossed pair of `dice_roll_start` messages only starts one.
    pub fn start(&mut self) -> bool {
        if self.rolling {
            return false;
        }
        self.rolling = true;
        self.local = None;
        self.remote = None;
        self.decided = None;
        self.interrupted = false;
        true
    }

    /// Abandons an undecided round, e.g. when the link drops mid-roll.
    /// Dice already sent may never have arrived, so the round has to start
    /// over. Returns `false` if nothing was running.
    pub fn interrupt(&mut self) -> bool {
        if !self.rolling {
            return false;
        }
        self.rolling = false;
        self.local = None;
        self.remote = None;
        self.interrupted = true;
        tracing::debug!("turn-order roll interrupted");
        true
    }

    /// `true` after [`interrupt`](Self::interrupt) until the next round
    /// starts.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn is_rolling(&self) -> bool {
        self.rolling
    }

    pub fn local(&self) -> Option<u8> {
        self.local
    }

    pub fn remote(&self) -> Option<u8> {
        self.remote
    }

    /// Ties seen since the last [`reset`](Self::reset).
    pub fn ties(&self) -> u32 {
        self.ties
    }

    /// The settled result, once there is a winner.
    pub fn decided(&self) -> Option<RollOutcome> {
        self.decided
    }

    /// Rolls our die. Returns `None` if we already rolled this round.
    pub fn roll_local<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<u8> {
        if self.local.is_some() {
            return None;
        }
        self.rolling = true;
        let value = roll_die(rng);
        self.local = Some(value);
        Some(value)
    }

    /// Records our die without rolling; used when the value comes from
    /// elsewhere (tests, replays).
    pub fn record_local(&mut self, value: u8) -> RollOutcome {
        self.rolling = true;
        self.local = Some(value);
        self.outcome()
    }

    /// Records the remote die. A result arriving before we rolled also
    /// opens the round; the caller should roll locally.
    pub fn record_remote(&mut self, value: u8) -> RollOutcome {
        self.rolling = true;
        self.remote = Some(value);
        self.outcome()
    }

    /// Compares both dice. On a tie the round resets, ready for a re-roll.
    pub fn outcome(&mut self) -> RollOutcome {
        let (Some(local), Some(remote)) = (self.local, self.remote) else {
            return RollOutcome::Pending;
        };
        let outcome = match local.cmp(&remote) {
            std::cmp::Ordering::Greater => RollOutcome::Won,
            std::cmp::Ordering::Less => RollOutcome::Lost,
            std::cmp::Ordering::Equal => RollOutcome::Tie,
        };
        if outcome == RollOutcome::Tie {
            self.ties += 1;
            self.local = None;
            self.remote = None;
            tracing::debug!(value = local, ties = self.ties, "turn-order tie, re-rolling");
        } else {
            self.rolling = false;
            self.decided = Some(outcome);
            tracing::debug!(local, remote, ?outcome, "turn-order roll settled");
        }
        outcome
    }

    /// The local winner picks. Returns the seat that moves first.
    ///
    /// # Errors
    /// [`SyncError::RollPending`] before a winner exists,
    /// [`SyncError::NotRollWinner`] when the local side lost.
    pub fn choose(&self, local_role: Role, starts_first: bool) -> Result<Slot, SyncError> {
        match self.decided {
            Some(RollOutcome::Won) => Ok(first_seat(local_role.is_host(), starts_first)),
            Some(_) => Err(SyncError::NotRollWinner(local_role.local_slot())),
            None => Err(SyncError::RollPending),
        }
    }

    /// Clears everything, e.g. for a rematch.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ---------------------------------------------------------------------------
// Harbinger draw
// ---------------------------------------------------------------------------

/// Three distinct dice and the grid cells they mark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarbingerDraw {
    pub rolls: Vec<u8>,
    pub positions: Vec<CellPos>,
}

impl HarbingerDraw {
    /// Rolls a fresh draw.
    pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let rolls = roll_unique_triple(rng).to_vec();
        let positions = rolls.iter().filter_map(|r| CellPos::from_roll(*r)).collect();
        Self { rolls, positions }
    }

    /// Checks a received draw before applying it: three distinct dice, each
    /// paired with the cell it marks.
    pub fn from_wire(rolls: Vec<u8>, positions: Vec<CellPos>) -> Result<Self, SyncError> {
        if rolls.len() != HARBINGER_DICE || positions.len() != HARBINGER_DICE {
            return Err(SyncError::InvalidDraw(format!(
                "expected {HARBINGER_DICE} rolls and positions"
            )));
        }
        for (i, (roll, pos)) in rolls.iter().zip(&positions).enumerate() {
            if rolls[..i].contains(roll) {
                return Err(SyncError::InvalidDraw(format!("roll {roll} repeated")));
            }
            match CellPos::from_roll(*roll) {
                Some(expected) if expected == *pos => {}
                Some(expected) => {
                    return Err(SyncError::InvalidDraw(format!(
                        "roll {roll} marks {expected}, not {pos}"
                    )));
                }
                None => {
                    return Err(SyncError::InvalidDraw(format!("roll {roll} out of range")));
                }
            }
        }
        Ok(Self { rolls, positions })
    }
}

/// Three pairwise-distinct values in `DIE_MIN..=DIE_MAX`. Duplicates are
/// re-rolled locally.
pub fn roll_unique_triple<R: Rng + ?Sized>(rng: &mut R) -> [u8; HARBINGER_DICE] {
    let mut rolls = [0u8; HARBINGER_DICE];
    let mut filled = 0;
    while filled < HARBINGER_DICE {
        let value = roll_die(rng);
        if !rolls[..filled].contains(&value) {
            rolls[filled] = value;
            filled += 1;
        }
    }
    rolls
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // =====================================================================
    // first_seat
    // =====================================================================

    #[test]
    fn test_first_seat_truth_table() {
        assert_eq!(first_seat(true, true), Slot::Player);
        assert_eq!(first_seat(true, false), Slot::Opponent);
        assert_eq!(first_seat(false, true), Slot::Opponent);
        assert_eq!(first_seat(false, false), Slot::Player);
    }

    #[test]
    fn test_first_seat_chooser_starts_iff_starts_first() {
        for chooser in [Role::Host, Role::Guest] {
            for starts_first in [true, false] {
                let seat = first_seat(chooser.is_host(), starts_first);
                assert_eq!(seat == chooser.local_slot(), starts_first);
            }
        }
    }

    // =====================================================================
    // TurnOrderRoll
    // =====================================================================

    #[test]
    fn test_start_twice_only_starts_once() {
        let mut roll = TurnOrderRoll::new();
        assert!(roll.start());
        assert!(!roll.start());
        assert!(roll.is_rolling());
    }

    #[test]
    fn test_outcome_pending_until_both_rolled() {
        let mut roll = TurnOrderRoll::new();
        roll.start();
        assert_eq!(roll.record_local(12), RollOutcome::Pending);
        assert_eq!(roll.record_remote(5), RollOutcome::Won);
        assert!(!roll.is_rolling());
        assert_eq!(roll.decided(), Some(RollOutcome::Won));
    }

    #[test]
    fn test_remote_result_first_opens_round() {
        let mut roll = TurnOrderRoll::new();
        assert_eq!(roll.record_remote(19), RollOutcome::Pending);
        assert!(roll.is_rolling());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(roll.roll_local(&mut rng).is_some());
        assert!(roll.roll_local(&mut rng).is_none(), "one roll per round");
    }

    #[test]
    fn test_tie_resets_for_reroll() {
        let mut roll = TurnOrderRoll::new();
        roll.start();
        roll.record_local(7);
        assert_eq!(roll.record_remote(7), RollOutcome::Tie);
        assert_eq!(roll.ties(), 1);
        assert!(roll.is_rolling());
        assert_eq!(roll.local(), None);
        assert_eq!(roll.remote(), None);

        roll.record_local(3);
        assert_eq!(roll.record_remote(9), RollOutcome::Lost);
    }

    #[test]
    fn test_choose_only_by_winner() {
        let mut roll = TurnOrderRoll::new();
        assert!(matches!(roll.choose(Role::Host, true), Err(SyncError::RollPending)));

        roll.record_local(2);
        roll.record_remote(20);
        assert!(matches!(
            roll.choose(Role::Host, true),
            Err(SyncError::NotRollWinner(Slot::Player))
        ));

        let mut won = TurnOrderRoll::new();
        won.record_local(20);
        won.record_remote(1);
        assert_eq!(won.choose(Role::Guest, true).unwrap(), Slot::Opponent);
    }

    // =====================================================================
    // Harbinger
    // =====================================================================

    #[test]
    fn test_roll_unique_triple_distinct_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let [a, b, c] = roll_unique_triple(&mut rng);
            assert!(a != b && a != c && b != c);
            for v in [a, b, c] {
                assert!((DIE_MIN..=DIE_MAX).contains(&v));
            }
        }
    }

    #[test]
    fn test_harbinger_roll_positions_match_rolls() {
        let draw = HarbingerDraw::roll(&mut rand::rng());
        assert_eq!(draw.positions.len(), HARBINGER_DICE);
        for (roll, pos) in draw.rolls.iter().zip(&draw.positions) {
            assert_eq!(CellPos::from_roll(*roll), Some(*pos));
        }
    }

    #[test]
    fn test_from_wire_rejects_repeated_position() {
        let p = CellPos::new(0, 0).unwrap();
        let result = HarbingerDraw::from_wire(vec![1, 2, 3], vec![p, p, p]);
        assert!(matches!(result, Err(SyncError::InvalidDraw(_))));
    }

    #[test]
    fn test_from_wire_rejects_positions_that_disagree_with_rolls() {
        let at = |roll| CellPos::from_roll(roll).unwrap();
        let result = HarbingerDraw::from_wire(vec![1, 2, 3], vec![at(1), at(2), at(4)]);
        assert!(matches!(result, Err(SyncError::InvalidDraw(msg)) if msg.contains("roll 3")));
    }

    #[test]
    fn test_from_wire_rejects_repeated_roll() {
        let at = |roll| CellPos::from_roll(roll).unwrap();
        let result = HarbingerDraw::from_wire(vec![5, 5, 6], vec![at(5), at(5), at(6)]);
        assert!(matches!(result, Err(SyncError::InvalidDraw(_))));
    }

    #[test]
    fn test_from_wire_accepts_rolled_draw() {
        let draw = HarbingerDraw::roll(&mut StdRng::seed_from_u64(9));
        let parsed = HarbingerDraw::from_wire(draw.rolls.clone(), draw.positions.clone()).unwrap();
        assert_eq!(parsed, draw);
    }

    // =====================================================================
    // Interrupted roll
    // =====================================================================

    #[test]
    fn test_interrupt_lets_a_new_round_start() {
        let mut roll = TurnOrderRoll::new();
        assert!(roll.start());
        roll.record_local(12);
        assert!(!roll.start(), "round still running");

        assert!(roll.interrupt());
        assert!(roll.was_interrupted());
        assert!(!roll.is_rolling());
        assert_eq!(roll.local(), None);

        assert!(roll.start());
        assert!(!roll.was_interrupted());
    }

    #[test]
    fn test_interrupt_keeps_a_settled_roll() {
        let mut roll = TurnOrderRoll::new();
        roll.start();
        roll.record_local(15);
        assert_eq!(roll.record_remote(3), RollOutcome::Won);

        assert!(!roll.interrupt());
        assert!(!roll.was_interrupted());
        assert_eq!(roll.decided(), Some(RollOutcome::Won));
    }
}
