//! In-process transport: both peers live in the same process and exchange
//! frames over channels. Used by tests and the hotseat demo.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// A hub that pairs a host listening on a code with the guest dialing it.
///
/// Cloning shares the hub, so give one clone to each peer.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    listeners: Arc<Mutex<HashMap<String, oneshot::Sender<MemoryConnection>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a host is waiting in [`accept`](Transport::accept) on
    /// `code`.
    pub async fn is_listening(&self, code: &str) -> bool {
        self.listeners
            .lock()
            .await
            .get(code)
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn accept(&self, code: &str) -> Result<MemoryConnection, TransportError> {
        let (tx, rx) = oneshot::channel();
        if self
            .listeners
            .lock()
            .await
            .insert(code.to_string(), tx)
            .is_some()
        {
            tracing::debug!(code, "replaced stale listener");
        }
        tracing::debug!(code, "memory transport listening");
        rx.await.map_err(|_| TransportError::Shutdown)
    }

    async fn connect(&self, code: &str) -> Result<MemoryConnection, TransportError> {
        let listener = self
            .listeners
            .lock()
            .await
            .remove(code)
            .ok_or_else(|| TransportError::UnknownCode(code.to_string()))?;

        let (host_side, guest_side) = MemoryConnection::pair();
        listener.send(host_side).map_err(|_| {
            TransportError::ConnectionClosed("host stopped listening".into())
        })?;
        tracing::debug!(code, id = %guest_side.id(), "memory connection established");
        Ok(guest_side)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.listeners.lock().await.clear();
        Ok(())
    }
}

/// One end of an in-memory duplex link.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    /// Two connected ends. Frames sent on one are received on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(a_tx)),
            rx: Mutex::new(a_rx),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(b_tx)),
            rx: Mutex::new(b_rx),
        };
        (a, b)
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        match self.tx.lock().await.as_ref() {
            Some(tx) => tx
                .send(data.to_vec())
                .map_err(|_| TransportError::ConnectionClosed("remote end dropped".into())),
            None => Err(TransportError::ConnectionClosed("closed locally".into())),
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping our sender ends the remote's recv stream.
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
