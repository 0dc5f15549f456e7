//! WebSocket transport over `tokio-tungstenite`.
//!
//! One JSON-RPC message per text frame. Binary frames are a protocol
//! violation; ping/pong frames are handled by the library and skipped here.
//!
//! A client transport remembers its URL and can `reconnect` by dialing it
//! again. A server-side transport wraps an already-accepted stream and
//! cannot reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

use crate::TransportError;

use super::TransportBackend;

type WsSink = Box<dyn Sink<WsMessage, Error = tungstenite::Error> + Send + Unpin>;
type WsStream = Box<dyn Stream<Item = Result<WsMessage, tungstenite::Error>> + Send + Unpin>;

#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    /// Dial target; `None` for accepted server-side connections.
    url: Option<String>,
    link: parking_lot::Mutex<Option<WsLink>>,
    closed: AtomicBool,
    /// Wakes a blocked `recv` when the link is replaced or closed.
    relink: tokio::sync::Notify,
}

#[derive(Clone)]
struct WsLink {
    sink: Arc<tokio::sync::Mutex<WsSink>>,
    stream: Arc<tokio::sync::Mutex<WsStream>>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.inner.url)
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Dial `url` and return a connected, reconnect-capable transport.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let link = dial(url).await?;
        Ok(Self {
            inner: Arc::new(WsInner {
                url: Some(url.to_owned()),
                link: parking_lot::Mutex::new(Some(link)),
                closed: AtomicBool::new(false),
                relink: tokio::sync::Notify::new(),
            }),
        })
    }

    /// Wrap an accepted server-side stream. No reconnection.
    pub fn accepted<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let link = WsLink {
            sink: Arc::new(tokio::sync::Mutex::new(Box::new(sink) as WsSink)),
            stream: Arc::new(tokio::sync::Mutex::new(Box::new(stream) as WsStream)),
        };
        Self {
            inner: Arc::new(WsInner {
                url: None,
                link: parking_lot::Mutex::new(Some(link)),
                closed: AtomicBool::new(false),
                relink: tokio::sync::Notify::new(),
            }),
        }
    }

    fn link(&self) -> Result<WsLink, TransportError> {
        match &*self.inner.link.lock() {
            Some(link) => Ok(link.clone()),
            // A reconnect-capable transport between links reports the
            // refused class so the caller's single-retry policy applies.
            None if self.inner.url.is_some() => Err(TransportError::ConnectionRefused),
            None => Err(TransportError::Closed),
        }
    }

    fn drop_link_if_current(&self, stale: &WsLink) {
        let mut link = self.inner.link.lock();
        if link
            .as_ref()
            .is_some_and(|l| Arc::ptr_eq(&l.stream, &stale.stream))
        {
            link.take();
        }
    }
}

async fn dial(url: &str) -> Result<WsLink, TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(map_ws_error)?;
    let (sink, stream) = ws.split();
    Ok(WsLink {
        sink: Arc::new(tokio::sync::Mutex::new(Box::new(sink) as WsSink)),
        stream: Arc::new(tokio::sync::Mutex::new(Box::new(stream) as WsStream)),
    })
}

fn map_ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Io(io) => io.into(),
        other => TransportError::Io(std::io::Error::other(other.to_string())),
    }
}

impl TransportBackend for WebSocketTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let link = self.link()?;
        let mut sink = link.sink.lock().await;
        sink.send(WsMessage::Text(text.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            let link = self.link()?;
            let frame = {
                let stream = link.stream.clone();
                tokio::select! {
                    frame = async { stream.lock().await.next().await } => frame,
                    // The link was replaced or closed out from under us.
                    _ = self.inner.relink.notified() => {
                        return Err(TransportError::Closed);
                    }
                }
            };
            match frame {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.to_string()),
                Some(Ok(WsMessage::Binary(_))) => {
                    return Err(TransportError::BadFrame(
                        "binary frame on a text protocol".into(),
                    ));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    self.drop_link_if_current(&link);
                    return Err(TransportError::Closed);
                }
                // Control frames are answered by the library.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.drop_link_if_current(&link);
                    return Err(map_ws_error(e));
                }
            }
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(url) = &self.inner.url else {
            return Err(TransportError::Closed);
        };
        let link = dial(url).await?;
        *self.inner.link.lock() = Some(link);
        self.inner.relink.notify_waiters();
        Ok(())
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.link.lock().take();
        self.inner.relink.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
