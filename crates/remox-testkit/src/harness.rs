//! Session wiring helpers over the mem transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use remox_core::transport::mem::MemDialer;
use remox_core::{Dispatcher, RpcSession, SessionConfig, Transport};
use tracing::debug;

/// Directly linked session pair with the receive loops running. No
/// dispatcher on either side; attach one before sending requests at it.
pub fn session_pair() -> (Arc<RpcSession>, Arc<RpcSession>) {
    let (a, b) = Transport::mem_pair();
    let left = RpcSession::new(a, SessionConfig::default());
    let right = RpcSession::new(b, SessionConfig::default());
    tokio::spawn(Arc::clone(&left).run());
    tokio::spawn(Arc::clone(&right).run());
    (left, right)
}

/// Session pair where the right-hand side serves requests through
/// `dispatcher`. Returns (client, server).
pub fn session_pair_with(dispatcher: Arc<Dispatcher>) -> (Arc<RpcSession>, Arc<RpcSession>) {
    let (a, b) = Transport::mem_pair();
    let client = RpcSession::new(a, SessionConfig::default());
    let server = RpcSession::new(b, SessionConfig::default());
    server.attach_dispatcher(dispatcher, "pair-0");
    tokio::spawn(Arc::clone(&client).run());
    tokio::spawn(Arc::clone(&server).run());
    (client, server)
}

/// Spawn an accept loop serving every dialed connection through
/// `dispatcher`. Each connection gets its own server session; the shared
/// dispatcher keeps logical sessions alive across connections, which is what
/// reconnection tests need.
pub fn spawn_server(dispatcher: Arc<Dispatcher>) -> MemDialer {
    spawn_server_with(dispatcher, |_| {})
}

/// Like [`spawn_server`], calling `on_accept` with each new server session.
pub fn spawn_server_with(
    dispatcher: Arc<Dispatcher>,
    on_accept: impl Fn(&Arc<RpcSession>) + Send + 'static,
) -> MemDialer {
    let (listener, dialer) = Transport::mem_listen();
    tokio::spawn(async move {
        let counter = AtomicU64::new(0);
        while let Some(transport) = listener.accept().await {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            debug!(connection = n, "server accepted connection");
            let session = RpcSession::new(Transport::Mem(transport), SessionConfig::default());
            session.attach_dispatcher(Arc::clone(&dispatcher), format!("conn-{n}"));
            on_accept(&session);
            tokio::spawn(Arc::clone(&session).run());
        }
    });
    dialer
}

/// Dial the server and start the client's receive loop.
pub fn connect_client(dialer: &MemDialer, config: SessionConfig) -> Arc<RpcSession> {
    let transport = Transport::Mem(dialer.dial().expect("dial refused"));
    let session = RpcSession::new(transport, config);
    tokio::spawn(Arc::clone(&session).run());
    session
}
