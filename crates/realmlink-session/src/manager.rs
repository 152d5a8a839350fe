//! The session manager: owns the one local session and its state machine.
//!
//! It's responsible for:
//! - Creating (host) or joining (guest) a session
//! - Walking the connection status through its legal transitions
//! - Telling the peer whether a `Connected` is a first connect or a resume
//! - Backoff between retries
//! - Persisting enough identity to resume after a reload
//!
//! # Concurrency note
//!
//! `SessionManager` is not thread-safe by itself. It is owned by the peer
//! actor task and only touched from there.

use std::time::Duration;

use rand::Rng;
use realmlink_protocol::{PeerId, Role};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::store::{KeyValueStore, load_json, save_json};
use crate::{ConnectionStatus, GameCode, RemotePeer, RetryConfig, Session, SessionError};

/// Storage key of the persisted [`SessionIdentity`].
pub const IDENTITY_KEY: &str = "realmlink.session";

/// What a reloaded peer needs to find its way back into a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub game_code: GameCode,
    pub role: Role,
    pub nickname: String,
    pub peer_id: PeerId,
    /// Milliseconds since the Unix epoch.
    pub saved_at: u64,
}

/// What a remote `hello` meant for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloOutcome {
    /// First time this session reached `Connected`.
    FirstConnect,
    /// `Connected` again after a drop.
    Resumed,
    /// Already connected; the hello only refreshed the remote's details.
    Duplicate,
}

/// Manages the local session.
///
/// ## Lifecycle
///
/// ```text
/// create()/join() ──→ listening() ──→ transport_connected() ──→ hello_received()
///                                                                   │
///        begin_resume() ←── transport_lost() ←──────────────────────┘
///              │
///              └──→ (listening()) ──→ transport_connected() ──→ hello_received()
/// ```
pub struct SessionManager {
    session: Option<Session>,
    retry: RetryConfig,
}

impl SessionManager {
    /// Creates a manager with no session.
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            session: None,
            retry: retry.validated(),
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Current status. `Disconnected` when there is no session.
    pub fn status(&self) -> ConnectionStatus {
        self.session
            .as_ref()
            .map(|s| s.status.clone())
            .unwrap_or(ConnectionStatus::Disconnected { since: None })
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Starts a new match as host under a freshly generated code.
    ///
    /// # Errors
    /// [`SessionError::AlreadyInSession`] if a session is alive.
    pub fn create(&mut self, nickname: &str) -> Result<&Session, SessionError> {
        self.create_with_code(GameCode::generate(), nickname)
    }

    /// Like [`create`](Self::create) with a caller-chosen code, for
    /// retrying after the directory reported a collision.
    pub fn create_with_code(
        &mut self,
        code: GameCode,
        nickname: &str,
    ) -> Result<&Session, SessionError> {
        self.start(code, Role::Host, nickname)
    }

    /// Joins an existing match as guest.
    pub fn join(&mut self, code: GameCode, nickname: &str) -> Result<&Session, SessionError> {
        self.start(code, Role::Guest, nickname)
    }

    fn start(&mut self, code: GameCode, role: Role, nickname: &str) -> Result<&Session, SessionError> {
        if let Some(existing) = &self.session {
            if !existing.status.is_error() {
                return Err(SessionError::AlreadyInSession(existing.code.clone()));
            }
            // A failed session is replaced; retrying create/join recovers
            // from `Error`.
        }

        tracing::info!(%code, %role, nickname, "session created");
        Ok(self.session.insert(Session {
            code,
            role,
            nickname: nickname.to_string(),
            peer_id: generate_peer_id(),
            remote: None,
            status: ConnectionStatus::Initializing,
            disconnected_at: None,
            has_connected: false,
        }))
    }

    /// Recreates a session from persisted identity, ready to resume.
    pub fn restore(&mut self, identity: SessionIdentity) -> Result<&Session, SessionError> {
        if let Some(existing) = &self.session {
            return Err(SessionError::AlreadyInSession(existing.code.clone()));
        }
        tracing::info!(code = %identity.game_code, role = %identity.role, "session restored");
        Ok(self.session.insert(Session {
            code: identity.game_code,
            role: identity.role,
            nickname: identity.nickname,
            peer_id: identity.peer_id,
            remote: None,
            status: ConnectionStatus::Disconnected { since: None },
            disconnected_at: None,
            has_connected: true,
        }))
    }

    /// Host only: the transport is listening on the code.
    pub fn listening(&mut self) -> Result<(), SessionError> {
        if !self.current()?.is_host() {
            return Err(SessionError::NotHost);
        }
        self.transition(ConnectionStatus::Waiting)
    }

    /// The transport reported a connection; the handshake is next.
    pub fn transport_connected(&mut self) -> Result<(), SessionError> {
        self.transition(ConnectionStatus::Connecting)
    }

    /// The remote `hello` arrived.
    ///
    /// Only this completes the handshake, so a resuming guest is not
    /// connected until the host has said hello.
    pub fn hello_received(
        &mut self,
        nickname: &str,
        peer_id: PeerId,
    ) -> Result<HelloOutcome, SessionError> {
        let remote = RemotePeer {
            nickname: nickname.to_string(),
            peer_id,
        };
        let session = self.current_mut()?;
        if session.status.is_connected() {
            session.remote = Some(remote);
            return Ok(HelloOutcome::Duplicate);
        }
        self.transition(ConnectionStatus::Connected)?;

        let session = self.current_mut()?;
        session.remote = Some(remote);
        let outcome = if session.has_connected {
            HelloOutcome::Resumed
        } else {
            HelloOutcome::FirstConnect
        };
        session.has_connected = true;
        tracing::info!(code = %session.code, remote = nickname, ?outcome, "handshake complete");
        Ok(outcome)
    }

    /// The transport closed or failed. Code and role are kept.
    pub fn transport_lost(&mut self) -> Result<(), SessionError> {
        let now = Instant::now();
        self.transition(ConnectionStatus::Disconnected { since: Some(now) })?;
        self.current_mut()?.disconnected_at = Some(now);
        Ok(())
    }

    /// Starts resuming the same code. Returns the first attempt number.
    pub fn begin_resume(&mut self) -> Result<u32, SessionError> {
        self.transition(ConnectionStatus::Reconnecting { attempt: 1 })?;
        Ok(1)
    }

    /// Records a failed resume attempt.
    ///
    /// Returns the delay to wait before the next attempt, or moves to
    /// `Error` and returns [`SessionError::RetriesExhausted`] when the
    /// budget is spent.
    pub fn resume_failed(&mut self, error: &str) -> Result<Duration, SessionError> {
        let ConnectionStatus::Reconnecting { attempt } = self.current()?.status else {
            return Err(SessionError::InvalidTransition {
                from: self.status(),
                to: ConnectionStatus::Reconnecting { attempt: 0 },
            });
        };
        if attempt >= self.retry.max_attempts {
            self.fail(error);
            return Err(SessionError::RetriesExhausted {
                attempts: attempt,
                last_error: error.to_string(),
            });
        }
        tracing::debug!(attempt, error, "resume attempt failed");
        let delay = self.backoff(attempt);
        self.transition(ConnectionStatus::Reconnecting {
            attempt: attempt + 1,
        })?;
        Ok(delay)
    }

    /// Jittered delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry.delay_for(attempt, &mut rand::rng())
    }

    /// Moves to `Error`. A no-op when there is no session.
    pub fn fail(&mut self, message: &str) {
        if let Some(session) = &mut self.session {
            tracing::warn!(code = %session.code, from = %session.status, message, "session failed");
            session.status = ConnectionStatus::Error {
                message: message.to_string(),
            };
        }
    }

    /// Ends the session on purpose. Returns it so the caller can clean up
    /// listings and stored identity.
    pub fn leave(&mut self) -> Option<Session> {
        let session = self.session.take();
        if let Some(s) = &session {
            tracing::info!(code = %s.code, "left session");
        }
        session
    }

    // -----------------------------------------------------------------
    // Identity persistence
    // -----------------------------------------------------------------

    pub fn identity(&self, saved_at: u64) -> Option<SessionIdentity> {
        self.session.as_ref().map(|s| SessionIdentity {
            game_code: s.code.clone(),
            role: s.role,
            nickname: s.nickname.clone(),
            peer_id: s.peer_id.clone(),
            saved_at,
        })
    }

    /// Saves the current identity under [`IDENTITY_KEY`].
    pub fn persist(&self, store: &dyn KeyValueStore, saved_at: u64) -> Result<(), SessionError> {
        let identity = self.identity(saved_at).ok_or(SessionError::NoSession)?;
        save_json(store, IDENTITY_KEY, &identity)
    }

    pub fn load_identity(store: &dyn KeyValueStore) -> Result<Option<SessionIdentity>, SessionError> {
        load_json(store, IDENTITY_KEY)
    }

    pub fn clear_identity(store: &dyn KeyValueStore) -> Result<(), SessionError> {
        store.delete(IDENTITY_KEY)
    }

    // -----------------------------------------------------------------

    fn current(&self) -> Result<&Session, SessionError> {
        self.session.as_ref().ok_or(SessionError::NoSession)
    }

    fn current_mut(&mut self) -> Result<&mut Session, SessionError> {
        self.session.as_mut().ok_or(SessionError::NoSession)
    }

    fn transition(&mut self, next: ConnectionStatus) -> Result<(), SessionError> {
        let session = self.current_mut()?;
        if !session.status.can_transition_to(&next) {
            return Err(SessionError::InvalidTransition {
                from: session.status.clone(),
                to: next,
            });
        }
        tracing::info!(code = %session.code, from = %session.status, to = %next, "status changed");
        session.status = next;
        Ok(())
    }
}

/// Random 32-character hex id (128 bits) for this peer's transport
/// identity.
fn generate_peer_id() -> PeerId {
    let bytes: [u8; 16] = rand::rng().random();
    PeerId(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Unit tests for `SessionManager`, named
    //! `test_{function}_{scenario}_{expected}`.

    use super::*;
    use crate::MemoryStore;

    // -- Helpers ----------------------------------------------------------

    fn manager() -> SessionManager {
        SessionManager::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: 0.0,
        })
    }

    fn code() -> GameCode {
        GameCode::parse("ABCDEF").unwrap()
    }

    fn remote() -> PeerId {
        PeerId("remote".into())
    }

    /// Host session walked all the way to `Connected`.
    fn connected_host() -> SessionManager {
        let mut mgr = manager();
        mgr.create_with_code(code(), "Ada").unwrap();
        mgr.listening().unwrap();
        mgr.transport_connected().unwrap();
        mgr.hello_received("Bo", remote()).unwrap();
        mgr
    }

    // =====================================================================
    // create() / join()
    // =====================================================================

    #[test]
    fn test_create_new_session_is_initializing_host() {
        let mut mgr = manager();
        let session = mgr.create("Ada").unwrap();
        assert_eq!(session.role, Role::Host);
        assert_eq!(session.code.as_str().len(), 6);
        assert_eq!(session.peer_id.0.len(), 32);
        assert_eq!(mgr.status(), ConnectionStatus::Initializing);
    }

    #[test]
    fn test_join_new_session_is_guest() {
        let mut mgr = manager();
        let session = mgr.join(code(), "Bo").unwrap();
        assert_eq!(session.role, Role::Guest);
        assert_eq!(session.local_slot(), realmlink_protocol::Slot::Opponent);
    }

    #[test]
    fn test_create_while_in_session_returns_error() {
        let mut mgr = manager();
        mgr.create("Ada").unwrap();
        assert!(matches!(
            mgr.join(code(), "Ada"),
            Err(SessionError::AlreadyInSession(_))
        ));
    }

    #[test]
    fn test_create_after_error_replaces_session() {
        let mut mgr = manager();
        mgr.create("Ada").unwrap();
        mgr.fail("signaling unreachable");
        assert!(mgr.status().is_error());
        mgr.create("Ada").expect("retry after error");
        assert_eq!(mgr.status(), ConnectionStatus::Initializing);
    }

    // =====================================================================
    // handshake
    // =====================================================================

    #[test]
    fn test_listening_as_guest_returns_not_host() {
        let mut mgr = manager();
        mgr.join(code(), "Bo").unwrap();
        assert!(matches!(mgr.listening(), Err(SessionError::NotHost)));
    }

    #[test]
    fn test_hello_first_time_is_first_connect() {
        let mut mgr = manager();
        mgr.join(code(), "Bo").unwrap();
        mgr.transport_connected().unwrap();
        let outcome = mgr.hello_received("Ada", remote()).unwrap();
        assert_eq!(outcome, HelloOutcome::FirstConnect);
        assert!(mgr.status().is_connected());
        assert_eq!(mgr.session().unwrap().remote.as_ref().unwrap().nickname, "Ada");
    }

    #[test]
    fn test_hello_before_transport_returns_invalid_transition() {
        let mut mgr = manager();
        mgr.create("Ada").unwrap();
        mgr.listening().unwrap();
        let result = mgr.hello_received("Bo", remote());
        assert!(matches!(result, Err(SessionError::InvalidTransition { .. })));
    }

    #[test]
    fn test_hello_twice_is_duplicate() {
        let mut mgr = connected_host();
        assert_eq!(
            mgr.hello_received("Bo", remote()).unwrap(),
            HelloOutcome::Duplicate
        );
    }

    // =====================================================================
    // drop and resume
    // =====================================================================

    #[tokio::test]
    async fn test_transport_lost_keeps_code_and_role() {
        let mut mgr = connected_host();
        mgr.transport_lost().unwrap();

        let session = mgr.session().unwrap();
        assert_eq!(session.code, code());
        assert_eq!(session.role, Role::Host);
        assert!(session.disconnected_at.is_some());
        assert!(matches!(
            mgr.status(),
            ConnectionStatus::Disconnected { since: Some(_) }
        ));
    }

    #[tokio::test]
    async fn test_resume_then_hello_is_resumed() {
        let mut mgr = connected_host();
        mgr.transport_lost().unwrap();
        assert_eq!(mgr.begin_resume().unwrap(), 1);
        mgr.listening().unwrap();
        mgr.transport_connected().unwrap();
        assert_eq!(
            mgr.hello_received("Bo", remote()).unwrap(),
            HelloOutcome::Resumed
        );
    }

    #[tokio::test]
    async fn test_resume_failed_backs_off_then_gives_up() {
        let mut mgr = connected_host();
        mgr.transport_lost().unwrap();
        mgr.begin_resume().unwrap();

        assert_eq!(mgr.resume_failed("refused").unwrap(), Duration::from_millis(100));
        assert_eq!(mgr.status(), ConnectionStatus::Reconnecting { attempt: 2 });
        assert_eq!(mgr.resume_failed("refused").unwrap(), Duration::from_millis(200));

        let result = mgr.resume_failed("refused");
        assert!(matches!(
            result,
            Err(SessionError::RetriesExhausted { attempts: 3, .. })
        ));
        assert!(mgr.status().is_error());
        assert!(mgr.session().is_some(), "code survives for a manual retry");
    }

    #[test]
    fn test_resume_failed_when_not_reconnecting_is_rejected() {
        let mut mgr = connected_host();
        assert!(mgr.resume_failed("x").is_err());
        assert!(mgr.status().is_connected());
    }

    // =====================================================================
    // leave / identity
    // =====================================================================

    #[test]
    fn test_leave_returns_session_and_clears() {
        let mut mgr = connected_host();
        let left = mgr.leave().unwrap();
        assert_eq!(left.code, code());
        assert!(mgr.session().is_none());
        assert_eq!(mgr.status(), ConnectionStatus::Disconnected { since: None });
    }

    #[test]
    fn test_persist_and_restore_identity() {
        let store = MemoryStore::new();
        let mgr = connected_host();
        mgr.persist(&store, 1_234).unwrap();
        let peer_id = mgr.session().unwrap().peer_id.clone();

        let identity = SessionManager::load_identity(&store).unwrap().unwrap();
        assert_eq!(identity.saved_at, 1_234);

        let mut reloaded = manager();
        let session = reloaded.restore(identity).unwrap();
        assert_eq!(session.peer_id, peer_id);
        assert!(session.has_connected(), "restored sessions resume");
        reloaded.begin_resume().unwrap();
    }

    #[test]
    fn test_persist_without_session_returns_no_session() {
        let store = MemoryStore::new();
        assert!(matches!(
            manager().persist(&store, 0),
            Err(SessionError::NoSession)
        ));
    }
}
