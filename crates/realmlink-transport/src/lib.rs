//! Transport abstraction layer for Realmlink.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! how two peers find each other and exchange frames. A match is addressed by
//! its game code: the host [`accept`](Transport::accept)s on a code and the
//! guest [`connect`](Transport::connect)s to it.
//!
//! Every implementation must deliver frames reliably and in order within one
//! connection. Nothing is promised across connections; after a reconnect the
//! sync layer re-establishes a baseline.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//!
//! The in-memory transport is always available.

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs across all transports.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide id.
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opens connections between the two peers of a match.
///
/// The returned futures are `Send` so a peer can open connections from
/// inside a spawned task (reconnects happen on the peer's own task).
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Host side: waits for the guest that dials `code`.
    fn accept(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Guest side: dials the host listening on `code`.
    ///
    /// # Errors
    /// [`TransportError::UnknownCode`] if nobody is listening on the code.
    fn connect(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send {
        async { Ok(()) }
    }
}

/// A single connection that can send and receive frames.
///
/// `send` and `recv` may be called concurrently from different tasks.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Sends data over an unreliable channel.
    ///
    /// Defaults to reliable send. Visual-only traffic (drag, ping) uses this
    /// so transports with a lossy lane can drop it under load.
    fn send_unreliable(
        &self,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.send(data)
    }

    /// Closes the connection. The remote side's `recv` returns `Ok(None)`.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
