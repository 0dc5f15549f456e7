//! In-process transport for tests and single-process wiring.
//!
//! Two shapes are offered:
//! - [`MemTransport::pair`]: two directly linked halves, no reconnection.
//! - [`MemTransport::listen`]: a [`MemListener`] / [`MemDialer`] pair that
//!   behaves like a socket listener. Each dial produces a fresh connection
//!   delivered to the listener, which is what lets reconnection and session
//!   resumption be exercised without a network.
//!
//! [`MemTransport::sever`] simulates abrupt connection loss: both halves see
//! `TransportError::Closed`, and a dial-capable half can `reconnect`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::TransportError;

use super::TransportBackend;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    endpoints: parking_lot::Mutex<Option<Endpoints>>,
    dialer: Option<MemDialer>,
    closed: AtomicBool,
    /// Wakes a blocked `recv` when the link is severed, replaced or closed.
    relink: tokio::sync::Notify,
}

#[derive(Debug)]
struct Endpoints {
    tx: mpsc::Sender<String>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
}

impl Endpoints {
    fn linked() -> (Endpoints, Endpoints) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Endpoints {
                tx: tx_b,
                rx: Arc::new(tokio::sync::Mutex::new(rx_a)),
            },
            Endpoints {
                tx: tx_a,
                rx: Arc::new(tokio::sync::Mutex::new(rx_b)),
            },
        )
    }
}

/// Accept side of [`MemTransport::listen`]: one `MemTransport` per dial.
#[derive(Debug)]
pub struct MemListener {
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemTransport>>,
}

impl MemListener {
    /// Next accepted connection, `None` once every dialer is gone.
    pub async fn accept(&self) -> Option<MemTransport> {
        self.accept_rx.lock().await.recv().await
    }
}

/// Dial side of [`MemTransport::listen`]. Cloneable; each clone dials the
/// same listener.
#[derive(Clone, Debug)]
pub struct MemDialer {
    accept_tx: mpsc::UnboundedSender<MemTransport>,
    refusing: Arc<AtomicBool>,
}

impl MemDialer {
    /// Produce a dial-capable client transport, already connected.
    pub fn dial(&self) -> Result<MemTransport, TransportError> {
        let endpoints = self.dial_endpoints()?;
        Ok(MemTransport {
            inner: Arc::new(MemInner {
                endpoints: parking_lot::Mutex::new(Some(endpoints)),
                dialer: Some(self.clone()),
                closed: AtomicBool::new(false),
                relink: tokio::sync::Notify::new(),
            }),
        })
    }

    /// Make subsequent dials fail with `ConnectionRefused` (test control).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::Release);
    }

    fn dial_endpoints(&self) -> Result<Endpoints, TransportError> {
        if self.refusing.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionRefused);
        }
        let (client, server) = Endpoints::linked();
        let accepted = MemTransport {
            inner: Arc::new(MemInner {
                endpoints: parking_lot::Mutex::new(Some(server)),
                dialer: None,
                closed: AtomicBool::new(false),
                relink: tokio::sync::Notify::new(),
            }),
        };
        self.accept_tx
            .send(accepted)
            .map_err(|_| TransportError::ConnectionRefused)?;
        Ok(client)
    }
}

impl MemTransport {
    pub fn pair() -> (Self, Self) {
        let (a, b) = Endpoints::linked();
        let make = |endpoints| Self {
            inner: Arc::new(MemInner {
                endpoints: parking_lot::Mutex::new(Some(endpoints)),
                dialer: None,
                closed: AtomicBool::new(false),
                relink: tokio::sync::Notify::new(),
            }),
        };
        (make(a), make(b))
    }

    pub fn listen() -> (MemListener, MemDialer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            MemListener {
                accept_rx: tokio::sync::Mutex::new(accept_rx),
            },
            MemDialer {
                accept_tx,
                refusing: Arc::new(AtomicBool::new(false)),
            },
        )
    }

    /// Drop the live link without closing the transport. Both halves' receive
    /// loops observe `Closed`; a dial-capable half may reconnect afterwards.
    pub fn sever(&self) {
        self.inner.endpoints.lock().take();
        self.inner.relink.notify_waiters();
    }
}

impl TransportBackend for MemTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let tx = match &*self.inner.endpoints.lock() {
            Some(endpoints) => endpoints.tx.clone(),
            // No live link. A dial-capable half reports this as the
            // refused class so the caller's single-retry policy applies.
            None if self.inner.dialer.is_some() => {
                return Err(TransportError::ConnectionRefused);
            }
            None => return Err(TransportError::Closed),
        };
        tx.send(text).await.map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let rx = match &*self.inner.endpoints.lock() {
            Some(endpoints) => endpoints.rx.clone(),
            None => return Err(TransportError::Closed),
        };
        let message = tokio::select! {
            message = async { rx.lock().await.recv().await } => message,
            // A local sever or close replaced the link out from under us.
            _ = self.inner.relink.notified() => None,
        };
        match message {
            Some(text) => Ok(text),
            None => {
                // The link is dead. Clear our half so sends fail consistently
                // until a reconnect.
                let mut endpoints = self.inner.endpoints.lock();
                if endpoints
                    .as_ref()
                    .is_some_and(|e| Arc::ptr_eq(&e.rx, &rx))
                {
                    endpoints.take();
                }
                Err(TransportError::Closed)
            }
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let Some(dialer) = &self.inner.dialer else {
            return Err(TransportError::Closed);
        };
        let endpoints = dialer.dial_endpoints()?;
        *self.inner.endpoints.lock() = Some(endpoints);
        self.inner.relink.notify_waiters();
        Ok(())
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.endpoints.lock().take();
        self.inner.relink.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
