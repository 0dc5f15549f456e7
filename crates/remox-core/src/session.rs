//! The session: demultiplexing, outbound calls, and connection recovery.
//!
//! An [`RpcSession`] wraps one [`Transport`] and one receive loop, [`run`].
//! That loop is the sole caller of `Transport::recv`: it routes responses to
//! their pending callers by id and hands inbound requests to the attached
//! [`Dispatcher`]. Everything else talks to the peer by sending only.
//!
//! The logical session survives connection loss. The first response from the
//! peer carries a session id, which the session stores and injects into every
//! later request; after a transport-level reconnect, a `connect` handshake
//! carrying that id resumes the old session on the server.
//!
//! [`run`]: RpcSession::run

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::codes;
use crate::dispatcher::Dispatcher;
use crate::message::{METHOD_CONNECT, METHOD_PING, Message, Request, Response};
use crate::reconnect::{Claim, ConnectionState, ReconnectConfig, ReconnectionManager};
use crate::transport::Transport;
use crate::{RpcError, TransportError};

/// What to do when sending a request hits a refused connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Reconnect and retry the send once, then give up.
    #[default]
    RetryOnce,
    /// Surface the transport error immediately.
    FailFast,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Per-call deadline. On expiry the pending entry is abandoned locally
    /// and a late response is discarded.
    pub request_timeout: Duration,
    /// Cap on in-flight requests; calls beyond it fail with `TooManyPending`.
    pub max_pending: usize,
    /// Interval for liveness pings. `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_pending: 8192,
            heartbeat_interval: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

type PendingSender = oneshot::Sender<Result<Value, RpcError>>;

struct InboundRoute {
    dispatcher: Arc<Dispatcher>,
    transport_id: String,
}

pub struct RpcSession {
    transport: Transport,
    config: SessionConfig,
    pending: parking_lot::Mutex<HashMap<u64, PendingSender>>,
    next_id: AtomicU64,
    session_id: parking_lot::Mutex<Option<String>>,
    inbound: parking_lot::Mutex<Option<InboundRoute>>,
    reconnection: ReconnectionManager,
}

impl RpcSession {
    pub fn new(transport: Transport, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            config,
            pending: parking_lot::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            session_id: parking_lot::Mutex::new(None),
            inbound: parking_lot::Mutex::new(None),
            reconnection: ReconnectionManager::new(),
        })
    }

    /// Route inbound requests to `dispatcher`, keyed by `transport_id` for
    /// server-side session tracking.
    pub fn attach_dispatcher(&self, dispatcher: Arc<Dispatcher>, transport_id: impl Into<String>) {
        *self.inbound.lock() = Some(InboundRoute {
            dispatcher,
            transport_id: transport_id.into(),
        });
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// The session id assigned by the peer, once one has been observed.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.reconnection.state()
    }

    /// Explicit session handshake. Optional: the id is also captured from the
    /// first response of any call.
    pub async fn connect(self: &Arc<Self>) -> Result<Value, RpcError> {
        self.call(METHOD_CONNECT, None).await
    }

    pub async fn call(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        self.call_with_policy(method, params, RetryPolicy::default())
            .await
    }

    pub async fn call_with_policy(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        policy: RetryPolicy,
    ) -> Result<Value, RpcError> {
        let mut retried = false;
        loop {
            let epoch = self.reconnection.epoch();
            match self.call_once(method, params.clone()).await {
                Err(RpcError::Transport(e))
                    if e.is_connection_refused() && policy == RetryPolicy::RetryOnce && !retried =>
                {
                    retried = true;
                    debug!(method, "send refused, reconnecting for a single retry");
                    self.recover(epoch).await?;
                }
                other => return other,
            }
        }
    }

    /// Fire-and-forget notification. No id, no response, no retry.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let mut request = Request::new(None, method, params);
        request.session_id = self.session_id();
        self.transport.send(request.to_text()).await?;
        Ok(())
    }

    /// Close for good: fail in-flight calls, stop recovery, end `run`.
    pub fn close(&self) {
        self.reconnection.close();
        self.transport.close();
        self.fail_all_pending();
    }

    async fn call_once(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.config.max_pending {
                return Err(RpcError::TooManyPending);
            }
            pending.insert(id, tx);
        }
        // Removes the entry on every exit path except a routed response.
        let guard = PendingGuard {
            pending: &self.pending,
            id,
            armed: true,
        };

        let mut request = Request::new(Some(id), method, params);
        request.session_id = self.session_id();
        self.transport.send(request.to_text()).await?;

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Err(_) => {
                debug!(id, method, "call timed out, abandoning pending entry");
                Err(RpcError::Timeout)
            }
            // Sender dropped without a value: the entry was discarded.
            Ok(Err(_)) => Err(RpcError::Transport(TransportError::Closed)),
            Ok(Ok(result)) => {
                guard.disarm();
                result
            }
        }
    }

    /// Receive loop. Sole caller of `Transport::recv`; spawn exactly once.
    pub async fn run(self: Arc<Self>) {
        loop {
            let epoch = self.reconnection.epoch();
            match self.transport.recv().await {
                Ok(text) => self.handle_frame(&text).await,
                Err(e) => {
                    debug!(error = %e, "receive failed, link is down");
                    self.fail_all_pending();
                    if self.transport.is_closed()
                        || self.reconnection.state() == ConnectionState::Closed
                    {
                        break;
                    }
                    if self.recover(epoch).await.is_err() {
                        break;
                    }
                }
            }
        }
        if let Some(route) = &*self.inbound.lock() {
            route
                .dispatcher
                .sessions()
                .on_transport_closed(&route.transport_id);
        }
        self.fail_all_pending();
        trace!("session receive loop finished");
    }

    async fn handle_frame(&self, text: &str) {
        let message = match Message::from_text(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        match message {
            Message::Response(response) => self.route_response(response),
            Message::Request(request) => {
                let route = {
                    let inbound = self.inbound.lock();
                    inbound
                        .as_ref()
                        .map(|r| (Arc::clone(&r.dispatcher), r.transport_id.clone()))
                };
                match route {
                    Some((dispatcher, transport_id)) => {
                        dispatcher
                            .dispatch(self.transport.clone(), &transport_id, request)
                            .await;
                    }
                    None => {
                        warn!(method = %request.method, "dropping inbound request, no dispatcher attached");
                    }
                }
            }
        }
    }

    fn route_response(&self, response: Response) {
        if let Some(session_id) = &response.session_id {
            let mut current = self.session_id.lock();
            if current.as_deref() != Some(session_id) {
                debug!(session_id, "session id captured from response");
                *current = Some(session_id.clone());
            }
        }
        let Some(id) = response.id else {
            debug!("dropping response without id");
            return;
        };
        let Some(sender) = self.pending.lock().remove(&id) else {
            // Late response to a timed-out or retried call.
            debug!(id, "dropping response with no pending caller");
            return;
        };
        let _ = sender.send(response.into_result());
    }

    fn fail_all_pending(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for (id, sender) in pending {
            trace!(id, "failing pending call, transport lost");
            let _ = sender.send(Err(RpcError::Transport(TransportError::Closed)));
        }
    }

    /// Bring the link back after a failure observed at `epoch`. Exactly one
    /// task drives the transport reconnect; the rest wait for its outcome.
    async fn recover(self: &Arc<Self>, epoch: u64) -> Result<(), RpcError> {
        match self.reconnection.begin(epoch) {
            Claim::AlreadyRecovered => return Ok(()),
            Claim::Dead => return Err(RpcError::Transport(TransportError::Closed)),
            Claim::Wait => {
                return match self.reconnection.wait_settled().await {
                    ConnectionState::Connected => Ok(()),
                    _ => Err(RpcError::Transport(TransportError::Closed)),
                };
            }
            Claim::Driver => {}
        }

        let cfg = self.config.reconnect.clone();
        if !cfg.enabled {
            self.reconnection.finish(false);
            return Err(RpcError::Transport(TransportError::Closed));
        }
        for attempt in 1..=cfg.max_attempts {
            match self.transport.reconnect().await {
                Ok(()) => {
                    debug!(attempt, "transport reconnected");
                    self.reconnection.finish(true);
                    self.spawn_session_resume();
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    tokio::time::sleep(cfg.delay).await;
                }
            }
        }
        warn!("reconnection given up");
        self.reconnection.finish(false);
        Err(RpcError::Transport(TransportError::Closed))
    }

    /// Resume the logical session on the fresh link. Spawned so the demux
    /// loop is free to receive the handshake's own response.
    fn spawn_session_resume(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            match session
                .call_with_policy(METHOD_CONNECT, None, RetryPolicy::FailFast)
                .await
            {
                Ok(_) => debug!("session resumed"),
                Err(RpcError::Server { code, .. }) if code == codes::INVALID_SESSION => {
                    // The server forgot us; start a fresh session instead.
                    warn!("stale session rejected by peer, reconnecting as new");
                    *session.session_id.lock() = None;
                    if let Err(e) = session
                        .call_with_policy(METHOD_CONNECT, None, RetryPolicy::FailFast)
                        .await
                    {
                        warn!(error = %e, "fresh session handshake failed");
                    }
                }
                Err(e) => warn!(error = %e, "session resume failed"),
            }
        });
    }

    /// Periodic liveness pings. A missed pong triggers the same recovery as
    /// a receive failure. No-op unless `heartbeat_interval` is configured.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let Some(interval) = self.config.heartbeat_interval else {
            return;
        };
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if session.transport.is_closed()
                    || session.reconnection.state() == ConnectionState::Closed
                {
                    break;
                }
                let epoch = session.reconnection.epoch();
                let ping = tokio::time::timeout(interval, session.call_once(METHOD_PING, None));
                match ping.await {
                    Ok(Ok(_)) => {}
                    Ok(Err(RpcError::TooManyPending)) => {}
                    outcome => {
                        debug!(?outcome, "heartbeat missed, recovering");
                        if session.recover(epoch).await.is_err() {
                            break;
                        }
                    }
                }
            }
            trace!("heartbeat task finished");
        });
    }
}

impl std::fmt::Debug for RpcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSession")
            .field("session_id", &self.session_id())
            .field("pending", &self.pending.lock().len())
            .field("state", &self.reconnection.state())
            .finish_non_exhaustive()
    }
}

struct PendingGuard<'a> {
    pending: &'a parking_lot::Mutex<HashMap<u64, PendingSender>>,
    id: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.lock().remove(&self.id);
        }
    }
}
