//! Full-sync reconciliation on the guest.
//!
//! The host's `full_sync` is authoritative for the board, the turn, and the
//! host's own zones. It only carries placeholders for the guest's hidden
//! zones, so the guest fills those in from the best source it has:
//!
//! 1. **Memory**: its current state still holds real cards.
//! 2. **Local snapshot**: the record saved on this device.
//! 3. **Remote snapshot**: the copy pushed to the directory.
//! 4. **Host**: nothing better exists; keep the placeholders.
//!
//! A source is consulted only when every higher one came up empty. The
//! remote fetch is passed in as a closure so it never runs in that case.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use realmlink_protocol::{CardId, PlayerZones, SerializedGameState, Slot};
use realmlink_session::{GameCode, PrivateSnapshot, SNAPSHOT_MAX_AGE};
use realmlink_state::MatchState;

/// The guest's seat in the host-centric state.
const GUEST_SLOT: Slot = Slot::Opponent;

/// Where the guest's private zones came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    Memory,
    LocalSnapshot,
    RemoteSnapshot,
    Host,
}

impl fmt::Display for RestoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::LocalSnapshot => write!(f, "local snapshot"),
            Self::RemoteSnapshot => write!(f, "remote snapshot"),
            Self::Host => write!(f, "host"),
        }
    }
}

/// Which sources the reconciler may use, and how old a snapshot may be.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// Snapshots older than this are ignored. Default: 1 hour.
    pub snapshot_max_age: Duration,
    pub use_memory: bool,
    pub use_local_snapshot: bool,
    pub use_remote_snapshot: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            snapshot_max_age: SNAPSHOT_MAX_AGE,
            use_memory: true,
            use_local_snapshot: true,
            use_remote_snapshot: true,
        }
    }
}

impl ReconcilePolicy {
    /// Clamp and fix any out-of-range values so the policy is safe to use.
    pub fn validated(mut self) -> Self {
        if self.snapshot_max_age.is_zero() {
            tracing::warn!("snapshot_max_age is 0, using the default");
            self.snapshot_max_age = SNAPSHOT_MAX_AGE;
        }
        self
    }
}

/// The merged state and the source that won.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub state: SerializedGameState,
    pub source: RestoreSource,
    /// Card ids found in more than one zone after the merge.
    pub duplicates: Vec<CardId>,
}

/// Merges an incoming `full_sync` with the guest's own private zones.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(policy: ReconcilePolicy) -> Self {
        Self {
            policy: policy.validated(),
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Resolves the guest's private zones and returns the merged state.
    ///
    /// `now_ms` is the wall clock used for snapshot age. `fetch_remote`
    /// runs only when memory and the local snapshot both came up empty;
    /// it should map lookup failures to `None`.
    pub async fn reconcile<F, Fut>(
        &self,
        code: &GameCode,
        current: &MatchState,
        incoming: SerializedGameState,
        local: Option<&PrivateSnapshot>,
        now_ms: u64,
        fetch_remote: F,
    ) -> Reconciliation
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<PrivateSnapshot>>,
    {
        let (zones, source) = match self.resolve_local(code, current, local, now_ms) {
            Some(found) => found,
            None => self.resolve_remote(code, fetch_remote).await,
        };

        let mut state = incoming;
        if let Some(zones) = zones {
            merge_private(state.zones_mut(GUEST_SLOT), zones);
        }

        let duplicates = MatchState::from_serialized(state.clone()).duplicate_ids();
        if duplicates.is_empty() {
            tracing::info!(%code, %source, "full sync reconciled");
        } else {
            tracing::warn!(%code, %source, ?duplicates, "full sync merged with duplicate card ids");
        }

        Reconciliation {
            state,
            source,
            duplicates,
        }
    }

    /// Memory, then local snapshot. `None` means neither had cards.
    fn resolve_local(
        &self,
        code: &GameCode,
        current: &MatchState,
        local: Option<&PrivateSnapshot>,
        now_ms: u64,
    ) -> Option<(Option<PlayerZones>, RestoreSource)> {
        if self.policy.use_memory && current.has_known_private_zones(GUEST_SLOT) {
            let zones = current.serialized().zones(GUEST_SLOT).clone();
            return Some((Some(zones), RestoreSource::Memory));
        }

        if self.policy.use_local_snapshot {
            let usable = local.filter(|s| {
                s.has_cards() && s.is_valid_for(code, now_ms, self.policy.snapshot_max_age)
            });
            if let Some(snapshot) = usable {
                return Some((Some(zones_from(snapshot)), RestoreSource::LocalSnapshot));
            }
            if local.is_some() {
                tracing::debug!(%code, "local snapshot stale or empty");
            }
        }
        None
    }

    /// Remote snapshot, then the host's placeholders.
    async fn resolve_remote<F, Fut>(
        &self,
        code: &GameCode,
        fetch_remote: F,
    ) -> (Option<PlayerZones>, RestoreSource)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<PrivateSnapshot>>,
    {
        if self.policy.use_remote_snapshot {
            let remote = fetch_remote().await;
            if let Some(snapshot) = remote.filter(|s| s.game_code == *code && s.has_cards()) {
                return (Some(zones_from(&snapshot)), RestoreSource::RemoteSnapshot);
            }
        }
        (None, RestoreSource::Host)
    }
}

fn zones_from(snapshot: &PrivateSnapshot) -> PlayerZones {
    let mut zones = PlayerZones::default();
    snapshot.restore_into(&mut zones);
    zones
}

/// Overwrites the hidden zones of `target`. Counters and the casting stack
/// stay as the host sent them.
fn merge_private(target: &mut PlayerZones, source: PlayerZones) {
    target.hand = source.hand;
    target.site_deck = source.site_deck;
    target.spell_deck = source.spell_deck;
    target.graveyard = source.graveyard;
    target.collection = source.collection;
}
