//! # Realmlink
//!
//! State sync for a two-player virtual tabletop.
//!
//! Each player runs one peer. The host owns the canonical match state and
//! the guest mirrors it; both apply their own actions immediately and
//! broadcast them with a sequence number the other side acknowledges.
//! When the link drops the peers keep their session, reconnect on their
//! own, and the host pushes a full sync that the guest merges with the
//! hidden zones only it knows.
//!
//! The runtime is an actor per peer: [`Peer::spawn`] starts it and hands
//! back a [`PeerHandle`] for commands and a [`PeerView`] stream for
//! drawing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use realmlink::prelude::*;
//!
//! # async fn demo() -> Result<(), RealmlinkError> {
//! let transport = MemoryTransport::new();
//! let directory = MemoryDirectory::new();
//!
//! let host = Peer::spawn(PeerConfig::named("Ada"), transport.clone(), directory.clone(), MemoryStore::new());
//! let guest = Peer::spawn(PeerConfig::named("Brook"), transport, directory, MemoryStore::new());
//!
//! let code = host.create().await?;
//! guest.join(code).await?;
//! guest.wait_for(|v| v.is_connected()).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handler;
mod lobby;
mod peer;

pub use config::PeerConfig;
pub use error::RealmlinkError;
pub use lobby::Lobby;
pub use peer::{DragUpdate, Peer, PeerHandle, PeerView};

pub use realmlink_protocol as protocol;
pub use realmlink_session as session;
pub use realmlink_state as state;
pub use realmlink_sync as sync;
pub use realmlink_timer as timer;
pub use realmlink_transport as transport;

/// The types most programs need.
pub mod prelude {
    pub use crate::{DragUpdate, Lobby, Peer, PeerConfig, PeerHandle, PeerView, RealmlinkError};
    pub use realmlink_protocol::{Card, CardId, CardKind, DeckType, Role, Slot};
    pub use realmlink_session::{
        ConnectionStatus, Directory, GameCode, KeyValueStore, MemoryDirectory, MemoryStore,
    };
    pub use realmlink_state::{Action, LogKind, Zone};
    pub use realmlink_sync::{RestoreSource, RollOutcome};
    pub use realmlink_transport::{MemoryTransport, Transport};
}
