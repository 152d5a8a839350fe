//! Match sessions for Realmlink.
//!
//! This crate handles the lifecycle of one peer's place in a match:
//!
//! 1. **Codes**: the 6-character handle both peers share ([`GameCode`])
//! 2. **Session tracking**: role, remote peer and the connection state
//!    machine ([`SessionManager`], [`ConnectionStatus`])
//! 3. **Resume**: backoff ([`RetryConfig`]), persisted identity and the
//!    guest's private-zone snapshot ([`PrivateSnapshot`])
//! 4. **Directory**: where games are listed and found ([`Directory`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Peer runtime (above)  ← drives the state machine from transport events
//!     ↕
//! Session Layer (this crate)  ← who we are, which match, connection state
//!     ↕
//! Protocol Layer (below)  ← provides PeerId, Role, zone types
//! ```

mod code;
mod directory;
mod error;
mod manager;
mod session;
mod snapshot;
mod store;

pub use code::{CODE_ALPHABET, CODE_LEN, GameCode};
pub use directory::{ActiveGame, Directory, GameStatus, MemoryDirectory, PublicGame};
pub use error::SessionError;
pub use manager::{HelloOutcome, IDENTITY_KEY, SessionIdentity, SessionManager};
pub use session::{ConnectionStatus, RemotePeer, RetryConfig, Session};
pub use snapshot::{
    PrivateSnapshot, SNAPSHOT_KEY, SNAPSHOT_MAX_AGE, clear_snapshot, load_snapshot, save_snapshot,
};
pub use store::{KeyValueStore, MemoryStore, load_json, save_json};
