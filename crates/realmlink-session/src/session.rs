//! Session types: the local record of one match and its connection state.
//!
//! A session tracks:
//! - WHICH match this is (`GameCode`) and WHICH side we are (`Role`)
//! - WHO the other peer is, once its `hello` arrives
//! - WHAT the connection is doing right now (`ConnectionStatus`)
//! - WHEN it dropped, so "left" and "dropped" stay distinguishable

use std::fmt;
use std::time::Duration;

use rand::Rng;
use realmlink_protocol::{PeerId, Role, Slot};
use tokio::time::Instant;

use crate::GameCode;

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Backoff policy for create, join and resume.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`, capped at
/// `max_delay`, then scaled by a random factor in `1 ± jitter`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts before giving up and entering `Error`. Minimum 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// - `max_attempts` at least 1.
    /// - `base_delay` at least 1 ms, `max_delay` at least `base_delay`.
    /// - `jitter` clamped to `0.0..=1.0` (non-finite becomes 0).
    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            tracing::warn!("max_attempts is 0, using 1");
            self.max_attempts = 1;
        }
        self.base_delay = self.base_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(self.base_delay);
        self.jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Delay before attempt `attempt` (1-based) with no jitter applied.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay before attempt `attempt`, jittered.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }
}

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Where the session's connection is in its lifecycle.
///
/// ```text
///   Disconnected ──create/join──→ Initializing ──(host)──→ Waiting
///        ↑  │                          │                      │
///        │  └──resume──→ Reconnecting ─┴──→ Connecting ←──────┘
///        │                    │                 │
///        └──transport lost────┴──── Connected ←─┘
///
///   any ──failure──→ Error ──retry──→ Initializing / Reconnecting
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No live transport. `since` is set once a live connection was lost.
    Disconnected { since: Option<Instant> },
    Initializing,
    /// Host only: listening for the guest.
    Waiting,
    /// Transport is up; waiting for the remote `hello`.
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Error { message: String },
}

impl ConnectionStatus {
    /// Returns `true` if the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: &ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected { .. }, Initializing)
                | (Disconnected { .. }, Reconnecting { .. })
                | (Initializing, Waiting)
                | (Initializing, Connecting)
                | (Waiting, Connecting)
                | (Connecting, Connected)
                | (Reconnecting { .. }, Waiting)
                | (Reconnecting { .. }, Connecting)
                | (Reconnecting { .. }, Reconnecting { .. })
                | (Connected, Disconnected { .. })
                | (Initializing | Waiting | Connecting | Reconnecting { .. }, Disconnected { .. })
                | (Error { .. }, Initializing)
                | (Error { .. }, Reconnecting { .. })
                | (Error { .. }, Disconnected { .. })
                | (_, Error { .. })
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { .. } => write!(f, "disconnected"),
            Self::Initializing => write!(f, "initializing"),
            Self::Waiting => write!(f, "waiting"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting({attempt})"),
            Self::Error { message } => write!(f, "error({message})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The other peer, as announced by its `hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub nickname: String,
    pub peer_id: PeerId,
}

/// One match instance, owned exclusively by the
/// [`SessionManager`](crate::SessionManager).
///
/// Survives transient disconnects: code and role are retained so the
/// session can resume.
#[derive(Debug, Clone)]
pub struct Session {
    pub code: GameCode,
    pub role: Role,
    pub nickname: String,
    pub peer_id: PeerId,
    pub remote: Option<RemotePeer>,
    pub(crate) status: ConnectionStatus,
    /// When the transport was last lost.
    pub disconnected_at: Option<Instant>,
    /// Set on the first `Connected` and never cleared.
    pub(crate) has_connected: bool,
}

impl Session {
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn local_slot(&self) -> Slot {
        self.role.local_slot()
    }

    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }

    pub fn has_connected(&self) -> bool {
        self.has_connected
    }
}
