//! Transport enum and internal backend trait.
//!
//! The public API is the [`Transport`] enum. Each backend lives in its own
//! module under `transport/` and implements the internal [`TransportBackend`]
//! trait. The rest of the crate never names a concrete backend.
//!
//! A transport carries whole text frames, one JSON-RPC message per frame.
//! Framing and JSON belong to the message layer; a backend only moves text.

use crate::TransportError;

pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    async fn send(&self, text: String) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<String, TransportError>;
    async fn reconnect(&self) -> Result<(), TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[derive(Clone, Debug)]
pub enum Transport {
    #[cfg(feature = "mem")]
    Mem(mem::MemTransport),
    #[cfg(feature = "websocket")]
    WebSocket(websocket::WebSocketTransport),
}

impl Transport {
    /// Send one message frame.
    pub async fn send(&self, text: String) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.send(text).await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.send(text).await,
        }
    }

    /// Receive the next message frame.
    ///
    /// Only the session demux loop calls this; concurrent receivers would
    /// steal frames from each other.
    pub async fn recv(&self) -> Result<String, TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.recv().await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.recv().await,
        }
    }

    /// Establish a fresh connection to the same peer, replacing the dead one.
    ///
    /// The logical session survives; the server is told which session this
    /// connection resumes by the layer above, not by the transport.
    pub async fn reconnect(&self) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.reconnect().await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.reconnect().await,
        }
    }

    /// Close for good. After this, `reconnect` fails and `recv` drains out.
    pub fn close(&self) {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.close(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.is_closed(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.is_closed(),
        }
    }

    /// Directly linked in-process pair, no reconnection support.
    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }

    /// In-process listener plus a dial-capable client transport factory.
    #[cfg(feature = "mem")]
    pub fn mem_listen() -> (mem::MemListener, mem::MemDialer) {
        mem::MemTransport::listen()
    }

    #[cfg(feature = "websocket")]
    pub async fn websocket(url: &str) -> Result<Self, TransportError> {
        Ok(Transport::WebSocket(
            websocket::WebSocketTransport::connect(url).await?,
        ))
    }

    /// Wrap an already-accepted server-side WebSocket stream.
    #[cfg(feature = "websocket")]
    pub fn websocket_accepted<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Transport::WebSocket(websocket::WebSocketTransport::accepted(ws))
    }
}

#[cfg(feature = "mem")]
pub mod mem;
#[cfg(feature = "websocket")]
pub mod websocket;
