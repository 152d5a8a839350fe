//! The match directory: where hosts list games and guests look them up.
//!
//! Realmlink doesn't run a directory itself. It defines the [`Directory`]
//! trait, the few calls a peer makes against one, and ships an in-memory
//! implementation for tests and single-process play. A real deployment
//! implements the trait against its own HTTP service.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use realmlink_protocol::{PeerId, SerializedGameState};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{GameCode, PrivateSnapshot, SessionError};

/// Listing status of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

/// A game still looking for a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicGame {
    pub code: GameCode,
    pub host_nickname: String,
    pub waiting_for: Duration,
}

/// A game in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveGame {
    pub code: GameCode,
    pub host_nickname: String,
    pub playing_for: Duration,
}

/// Directory service used by the peers.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` so one directory can be shared by a peer task
/// and the lobby poller. Every method returns a `Send` future so it can be
/// awaited inside spawned tasks.
pub trait Directory: Send + Sync + 'static {
    /// Lists a new game under `code`.
    fn register(
        &self,
        code: &GameCode,
        host: &PeerId,
        nickname: &str,
        public: bool,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Resolves a code to the host's peer id.
    ///
    /// # Errors
    /// [`SessionError::GameNotFound`] for an unknown code,
    /// [`SessionError::GameUnavailable`] once the game has started.
    fn join(&self, code: &GameCode) -> impl Future<Output = Result<PeerId, SessionError>> + Send;

    /// Public games still waiting for a guest, oldest first.
    fn list_public(&self) -> impl Future<Output = Result<Vec<PublicGame>, SessionError>> + Send;

    /// Games being played, longest-running first.
    fn list_active(&self) -> impl Future<Output = Result<Vec<ActiveGame>, SessionError>> + Send;

    fn push_private_snapshot(
        &self,
        code: &GameCode,
        snapshot: &PrivateSnapshot,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn pull_private_snapshot(
        &self,
        code: &GameCode,
    ) -> impl Future<Output = Result<Option<PrivateSnapshot>, SessionError>> + Send;

    /// Publishes the public board for spectators.
    fn push_board_snapshot(
        &self,
        code: &GameCode,
        state: &SerializedGameState,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    fn update_status(
        &self,
        code: &GameCode,
        status: GameStatus,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Removes the listing entirely.
    fn remove(&self, code: &GameCode) -> impl Future<Output = Result<(), SessionError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Listing {
    host: PeerId,
    host_nickname: String,
    public: bool,
    status: GameStatus,
    created_at: Instant,
    started_at: Option<Instant>,
    private_snapshot: Option<PrivateSnapshot>,
    board_snapshot: Option<SerializedGameState>,
}

/// A [`Directory`] held in process memory. Clones share the same listings.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    listings: Arc<Mutex<HashMap<GameCode, Listing>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of a listing, if it exists.
    pub async fn status(&self, code: &GameCode) -> Option<GameStatus> {
        self.listings.lock().await.get(code).map(|l| l.status)
    }

    /// The last board pushed for `code`.
    pub async fn board_snapshot(&self, code: &GameCode) -> Option<SerializedGameState> {
        self.listings
            .lock()
            .await
            .get(code)
            .and_then(|l| l.board_snapshot.clone())
    }
}

impl Directory for MemoryDirectory {
    async fn register(
        &self,
        code: &GameCode,
        host: &PeerId,
        nickname: &str,
        public: bool,
    ) -> Result<(), SessionError> {
        let listing = Listing {
            host: host.clone(),
            host_nickname: nickname.to_string(),
            public,
            status: GameStatus::Waiting,
            created_at: Instant::now(),
            started_at: None,
            private_snapshot: None,
            board_snapshot: None,
        };
        self.listings.lock().await.insert(code.clone(), listing);
        tracing::debug!(%code, %host, public, "game registered");
        Ok(())
    }

    async fn join(&self, code: &GameCode) -> Result<PeerId, SessionError> {
        let listings = self.listings.lock().await;
        let listing = listings
            .get(code)
            .ok_or_else(|| SessionError::GameNotFound(code.clone()))?;
        if listing.status != GameStatus::Waiting {
            return Err(SessionError::GameUnavailable(code.clone()));
        }
        Ok(listing.host.clone())
    }

    async fn list_public(&self) -> Result<Vec<PublicGame>, SessionError> {
        let listings = self.listings.lock().await;
        let mut games: Vec<_> = listings
            .iter()
            .filter(|(_, l)| l.public && l.status == GameStatus::Waiting)
            .map(|(code, l)| PublicGame {
                code: code.clone(),
                host_nickname: l.host_nickname.clone(),
                waiting_for: l.created_at.elapsed(),
            })
            .collect();
        games.sort_by(|a, b| b.waiting_for.cmp(&a.waiting_for).then(a.code.cmp(&b.code)));
        Ok(games)
    }

    async fn list_active(&self) -> Result<Vec<ActiveGame>, SessionError> {
        let listings = self.listings.lock().await;
        let mut games: Vec<_> = listings
            .iter()
            .filter(|(_, l)| l.status == GameStatus::Playing)
            .map(|(code, l)| ActiveGame {
                code: code.clone(),
                host_nickname: l.host_nickname.clone(),
                playing_for: l.started_at.map(|t| t.elapsed()).unwrap_or_default(),
            })
            .collect();
        games.sort_by(|a, b| b.playing_for.cmp(&a.playing_for).then(a.code.cmp(&b.code)));
        Ok(games)
    }

    async fn push_private_snapshot(
        &self,
        code: &GameCode,
        snapshot: &PrivateSnapshot,
    ) -> Result<(), SessionError> {
        let mut listings = self.listings.lock().await;
        let listing = listings
            .get_mut(code)
            .ok_or_else(|| SessionError::GameNotFound(code.clone()))?;
        listing.private_snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn pull_private_snapshot(
        &self,
        code: &GameCode,
    ) -> Result<Option<PrivateSnapshot>, SessionError> {
        Ok(self
            .listings
            .lock()
            .await
            .get(code)
            .and_then(|l| l.private_snapshot.clone()))
    }

    async fn push_board_snapshot(
        &self,
        code: &GameCode,
        state: &SerializedGameState,
    ) -> Result<(), SessionError> {
        let mut listings = self.listings.lock().await;
        let listing = listings
            .get_mut(code)
            .ok_or_else(|| SessionError::GameNotFound(code.clone()))?;
        listing.board_snapshot = Some(state.clone());
        Ok(())
    }

    async fn update_status(&self, code: &GameCode, status: GameStatus) -> Result<(), SessionError> {
        let mut listings = self.listings.lock().await;
        let listing = listings
            .get_mut(code)
            .ok_or_else(|| SessionError::GameNotFound(code.clone()))?;
        if status == GameStatus::Playing && listing.started_at.is_none() {
            listing.started_at = Some(Instant::now());
        }
        listing.status = status;
        tracing::debug!(%code, ?status, "game status updated");
        Ok(())
    }

    async fn remove(&self, code: &GameCode) -> Result<(), SessionError> {
        self.listings.lock().await.remove(code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> GameCode {
        GameCode::parse(s).unwrap()
    }

    fn host() -> PeerId {
        PeerId("host-peer".into())
    }

    #[tokio::test]
    async fn test_join_returns_host_peer() {
        let dir = MemoryDirectory::new();
        dir.register(&code("ABCDEF"), &host(), "Ada", true).await.unwrap();
        assert_eq!(dir.join(&code("ABCDEF")).await.unwrap(), host());
    }

    #[tokio::test]
    async fn test_join_unknown_code_fails() {
        let dir = MemoryDirectory::new();
        let result = dir.join(&code("ABCDEF")).await;
        assert!(matches!(result, Err(SessionError::GameNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_started_game_fails() {
        let dir = MemoryDirectory::new();
        dir.register(&code("ABCDEF"), &host(), "Ada", true).await.unwrap();
        dir.update_status(&code("ABCDEF"), GameStatus::Playing).await.unwrap();
        let result = dir.join(&code("ABCDEF")).await;
        assert!(matches!(result, Err(SessionError::GameUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_public_and_active() {
        let dir = MemoryDirectory::new();
        dir.register(&code("AAAAAA"), &host(), "Ada", true).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        dir.register(&code("BBBBBB"), &host(), "Bo", true).await.unwrap();
        dir.register(&code("CCCCCC"), &host(), "Cy", false).await.unwrap();

        let public = dir.list_public().await.unwrap();
        let codes: Vec<_> = public.iter().map(|g| g.code.as_str()).collect();
        assert_eq!(codes, ["AAAAAA", "BBBBBB"], "private listing hidden, oldest first");
        assert_eq!(public[0].waiting_for, Duration::from_secs(30));

        dir.update_status(&code("BBBBBB"), GameStatus::Playing).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let active = dir.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].playing_for, Duration::from_secs(5));
        assert_eq!(dir.list_public().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_private_snapshot_round_trip() {
        let dir = MemoryDirectory::new();
        let c = code("ABCDEF");
        dir.register(&c, &host(), "Ada", false).await.unwrap();
        assert!(dir.pull_private_snapshot(&c).await.unwrap().is_none());

        let snap = PrivateSnapshot::capture(c.clone(), &Default::default(), 7);
        dir.push_private_snapshot(&c, &snap).await.unwrap();
        assert_eq!(dir.pull_private_snapshot(&c).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn test_remove_drops_listing() {
        let dir = MemoryDirectory::new();
        let c = code("ABCDEF");
        dir.register(&c, &host(), "Ada", true).await.unwrap();
        dir.remove(&c).await.unwrap();
        assert!(dir.status(&c).await.is_none());
        assert!(dir.list_public().await.unwrap().is_empty());
    }
}
