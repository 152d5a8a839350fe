//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The host binds a listener and accepts upgrades on `/{code}`; the guest
//! dials `{base_url}/{code}`. Each connection is split into a sink and a
//! stream half behind separate locks so a pending `recv` never blocks `send`.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::{Connection, ConnectionId, Transport, TransportError};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A WebSocket-based [`Transport`].
///
/// Built with [`bind`](Self::bind) it accepts; built with
/// [`dialer`](Self::dialer) it connects. The unsupported direction returns
/// [`TransportError::Unsupported`].
pub struct WebSocketTransport {
    listener: Option<TcpListener>,
    base_url: Option<String>,
}

impl WebSocketTransport {
    /// Binds a listening (host-side) transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener: Some(listener),
            base_url: None,
        })
    }

    /// A dial-only (guest-side) transport targeting `base_url`, e.g.
    /// `ws://127.0.0.1:9000`.
    pub fn dialer(base_url: impl Into<String>) -> Self {
        Self {
            listener: None,
            base_url: Some(base_url.into().trim_end_matches('/').to_string()),
        }
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "dial-only transport has no local address",
            )),
        }
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn accept(&self, code: &str) -> Result<WebSocketConnection, TransportError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or(TransportError::Unsupported("accept on a dial-only transport"))?;
        let expected_path = format!("/{code}");

        // Upgrades for other codes are refused and we keep waiting.
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(TransportError::AcceptFailed)?;

            let path = expected_path.clone();
            let check_path = move |req: &Request, resp: Response| {
                if req.uri().path() == path {
                    Ok(resp)
                } else {
                    let mut refusal = ErrorResponse::new(Some("unknown game code".into()));
                    *refusal.status_mut() = StatusCode::NOT_FOUND;
                    Err(refusal)
                }
            };

            match tokio_tungstenite::accept_hdr_async(MaybeTlsStream::Plain(stream), check_path)
                .await
            {
                Ok(ws) => {
                    let conn = WebSocketConnection::new(ws);
                    tracing::debug!(id = %conn.id, %addr, code, "accepted WebSocket connection");
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "rejected WebSocket upgrade");
                }
            }
        }
    }

    async fn connect(&self, code: &str) -> Result<WebSocketConnection, TransportError> {
        let base = self
            .base_url
            .as_ref()
            .ok_or(TransportError::Unsupported("connect on a listening transport"))?;
        let url = format!("{base}/{code}");

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let conn = WebSocketConnection::new(ws);
        tracing::debug!(id = %conn.id, %url, "connected WebSocket");
        Ok(conn)
    }
}

/// A single WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketConnection {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::next(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

impl Connection for WebSocketConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        // Frames are JSON, so they go out as text.
        let text = String::from_utf8_lossy(data).into_owned();
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
            })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_bytes().to_vec())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
