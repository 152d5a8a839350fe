//! Peer configuration.

use std::time::Duration;

use realmlink_session::RetryConfig;
use realmlink_sync::{AckPolicy, ReconcilePolicy};
use realmlink_timer::DebounceConfig;

/// Everything a peer can be tuned with. Every field has a working default.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Name shown to the other player.
    pub nickname: String,
    /// Host only: list the game in the public lobby.
    pub public: bool,
    /// Persistence flush timing.
    pub debounce: DebounceConfig,
    pub ack: AckPolicy,
    pub reconcile: ReconcilePolicy,
    /// Create, join and resume backoff.
    pub retry: RetryConfig,
    /// Reconnect on its own after the transport drops.
    pub auto_resume: bool,
    /// Fixed seed for dice, for reproducible tests. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            nickname: "Player".to_string(),
            public: false,
            debounce: DebounceConfig::default(),
            ack: AckPolicy::default(),
            reconcile: ReconcilePolicy::default(),
            retry: RetryConfig::default(),
            auto_resume: true,
            rng_seed: None,
            command_buffer: 64,
        }
    }
}

impl PeerConfig {
    pub const MAX_NICKNAME_LEN: usize = 32;

    /// A default config with the given nickname.
    pub fn named(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            ..Self::default()
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when the peer is spawned. Rules:
    /// - `nickname` trimmed, capped at [`Self::MAX_NICKNAME_LEN`] chars,
    ///   and never empty.
    /// - `command_buffer` at least 1.
    /// - Nested configs are validated too.
    pub fn validated(mut self) -> Self {
        let trimmed = self.nickname.trim();
        self.nickname = if trimmed.is_empty() {
            tracing::warn!("empty nickname, using default");
            Self::default().nickname
        } else {
            trimmed.chars().take(Self::MAX_NICKNAME_LEN).collect()
        };
        self.command_buffer = self.command_buffer.max(1);
        self.debounce = self.debounce.validated();
        self.ack = self.ack.validated();
        self.reconcile = self.reconcile.validated();
        self.retry = self.retry.validated();
        self
    }

    /// Lobby polling period used by [`Lobby`](crate::Lobby) by default.
    pub const LOBBY_POLL: Duration = Duration::from_secs(5);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_trims_and_caps_nickname() {
        let cfg = PeerConfig::named(&format!("  {}  ", "x".repeat(50))).validated();
        assert_eq!(cfg.nickname.len(), PeerConfig::MAX_NICKNAME_LEN);

        let cfg = PeerConfig::named("   ").validated();
        assert_eq!(cfg.nickname, "Player");
    }

    #[test]
    fn test_validated_fixes_zero_buffer() {
        let cfg = PeerConfig {
            command_buffer: 0,
            ..PeerConfig::default()
        }
        .validated();
        assert_eq!(cfg.command_buffer, 1);
    }
}
