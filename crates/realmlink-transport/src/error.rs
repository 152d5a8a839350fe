/// Errors that can occur in the transport layer.
///
/// Transport errors are always retryable from the caller's point of view:
/// they never leave match state half-applied.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// Dialing the host failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Nobody is listening on this game code.
    #[error("no host listening on code {0}")]
    UnknownCode(String),

    /// This transport instance can't perform the operation (e.g. a
    /// dial-only WebSocket transport asked to accept).
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
