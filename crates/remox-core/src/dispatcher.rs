//! Inbound request dispatch and server-side session tracking.
//!
//! The [`Dispatcher`] owns the method table and the [`SessionRegistry`]. The
//! session demux loop hands it every inbound request; it resolves the logical
//! session, answers the reserved `ping` and `connect` methods itself, and
//! spawns a bounded task per application request so a slow handler never
//! stalls the receive loop.
//!
//! A logical session outlives the connection that created it. When a
//! connection drops, its sessions linger for a grace period; a `connect`
//! carrying the session id within that window resumes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::codes;
use crate::message::{
    METHOD_CONNECT, METHOD_PING, PONG, RECONNECTION_SUCCESSFUL, Request, ResponseError,
    VALUE_PROPERTY,
};
use crate::transaction::Transaction;
use crate::transport::Transport;
use crate::RpcError;

/// Handles one application-level method.
///
/// The handler answers through the [`Transaction`]; returning without
/// responding is an error unless [`Transaction::start_async`] was called,
/// in which case some other task answers later through a clone.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(
        &self,
        transaction: Transaction,
        session: Arc<ServerSession>,
        request: Request,
    ) -> BoxFuture<'static, Result<(), RpcError>>;
}

struct FnHandler<F>(F);

impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Transaction, Arc<ServerSession>, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
{
    fn handle(
        &self,
        transaction: Transaction,
        session: Arc<ServerSession>,
        request: Request,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        Box::pin((self.0)(transaction, session, request))
    }
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Cap on concurrently running handler tasks.
    pub max_concurrent_requests: usize,
    /// How long a session survives after its connection drops.
    pub session_close_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 64,
            session_close_grace: Duration::from_secs(10),
        }
    }
}

pub struct Dispatcher {
    handlers: parking_lot::RwLock<HashMap<String, Arc<dyn RequestHandler>>>,
    default_handler: parking_lot::RwLock<Option<Arc<dyn RequestHandler>>>,
    sessions: SessionRegistry,
    limit: Arc<tokio::sync::Semaphore>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Arc<Self> {
        Arc::new(Self {
            handlers: parking_lot::RwLock::new(HashMap::new()),
            default_handler: parking_lot::RwLock::new(None),
            sessions: SessionRegistry::new(config.session_close_grace),
            limit: Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_requests)),
        })
    }

    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().insert(method.into(), handler);
    }

    pub fn register_fn<F, Fut>(&self, method: impl Into<String>, f: F)
    where
        F: Fn(Transaction, Arc<ServerSession>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.register(method, Arc::new(FnHandler(f)));
    }

    /// Handler for every method with no registered handler of its own.
    pub fn set_default_handler(&self, handler: Arc<dyn RequestHandler>) {
        *self.default_handler.write() = Some(handler);
    }

    pub fn set_default_fn<F, Fut>(&self, f: F)
    where
        F: Fn(Transaction, Arc<ServerSession>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.set_default_handler(Arc::new(FnHandler(f)));
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Route one inbound request. Called from the demux loop; must not block
    /// on application work.
    pub async fn dispatch(self: &Arc<Self>, transport: Transport, transport_id: &str, request: Request) {
        if request.method == METHOD_CONNECT {
            self.handle_connect(transport, transport_id, request).await;
            return;
        }

        let session = self.sessions.resolve(
            request.session_id.as_deref(),
            transport_id,
            request.method.as_str(),
        );
        let transaction = Transaction::new(
            &request,
            Some(session.session_id().to_owned()),
            transport,
        );

        if request.method == METHOD_PING {
            if let Err(e) = transaction.send_response(json!({ VALUE_PROPERTY: PONG })).await {
                debug!(error = %e, "ping response failed");
            }
            return;
        }

        // A session is new only for the first application request it serves;
        // the flip happens before the second one reaches its handler.
        if session.mark_served() {
            session.set_new(false);
        }

        let handler = self
            .handlers
            .read()
            .get(&request.method)
            .cloned()
            .or_else(|| self.default_handler.read().clone());
        let Some(handler) = handler else {
            if request.is_notification() {
                warn!(method = %request.method, "dropping notification with no handler");
            } else if let Err(e) = transaction
                .send_error(ResponseError::new(
                    codes::METHOD_NOT_FOUND,
                    format!("Unrecognized method '{}'", request.method),
                ))
                .await
            {
                debug!(error = %e, "method-not-found response failed");
            }
            return;
        };

        let limit = Arc::clone(&self.limit);
        let method = request.method.clone();
        tokio::spawn(async move {
            // The pool gate lives inside the task: a full pool delays this
            // handler, never the demux loop feeding us.
            let Ok(_permit) = limit.acquire_owned().await else {
                return;
            };
            let outcome = std::panic::AssertUnwindSafe(handler.handle(
                transaction.clone(),
                Arc::clone(&session),
                request,
            ))
            .catch_unwind()
            .await;
            match outcome {
                Ok(Ok(())) => {
                    if !transaction.is_notification()
                        && !transaction.has_responded()
                        && !transaction.is_async()
                    {
                        let _ = transaction
                            .send_error(ResponseError::new(
                                codes::INTERNAL_ERROR,
                                "handler did not respond",
                            ))
                            .await;
                    }
                }
                Ok(Err(e)) => {
                    if transaction.has_responded() {
                        warn!(method = %method, error = %e, "handler failed after responding");
                    } else {
                        let error = match e {
                            RpcError::Server {
                                code,
                                message,
                                data,
                            } => {
                                let mut err = ResponseError::new(code, message);
                                if let Some(data) = data {
                                    err = err.with_data(data);
                                }
                                err
                            }
                            other => ResponseError::new(codes::INTERNAL_ERROR, other.to_string()),
                        };
                        let _ = transaction.send_error(error).await;
                    }
                }
                Err(_) => {
                    warn!(method = %method, "handler panicked");
                    let _ = transaction
                        .send_error(ResponseError::new(
                            codes::INTERNAL_ERROR,
                            format!("Internal error handling '{method}'"),
                        ))
                        .await;
                }
            }
        });
    }

    async fn handle_connect(&self, transport: Transport, transport_id: &str, request: Request) {
        let (session, error) = match request.session_id.as_deref() {
            Some(session_id) => match self.sessions.get(session_id) {
                Some(session) => {
                    self.sessions.resume(&session, transport_id);
                    debug!(session_id, "session resumed");
                    (Some(session), None)
                }
                None => {
                    debug!(session_id, "connect with unknown session");
                    (
                        None,
                        Some(ResponseError::new(codes::INVALID_SESSION, "Invalid session")),
                    )
                }
            },
            None => {
                let session = self.sessions.create(transport_id);
                debug!(session_id = session.session_id(), "session created");
                (Some(session), None)
            }
        };

        let session_id = session.as_ref().map(|s| s.session_id().to_owned());
        let transaction = Transaction::new(&request, session_id, transport);
        let result = match error {
            None => {
                transaction
                    .send_response(json!({ VALUE_PROPERTY: RECONNECTION_SUCCESSFUL }))
                    .await
            }
            Some(error) => transaction.send_error(error).await,
        };
        if let Err(e) = result {
            debug!(error = %e, "connect response failed");
        }
    }
}

/// One logical server-side session, keyed by its session id.
#[derive(Debug)]
pub struct ServerSession {
    session_id: String,
    /// True until the first request after creation has been served.
    is_new: AtomicBool,
    /// Set once the first application request has been dispatched.
    served: AtomicBool,
    attributes: parking_lot::Mutex<HashMap<String, Value>>,
    transport_id: parking_lot::Mutex<String>,
    close_timer: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ServerSession {
    fn new(session_id: String, transport_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            is_new: AtomicBool::new(true),
            served: AtomicBool::new(false),
            attributes: parking_lot::Mutex::new(HashMap::new()),
            transport_id: parking_lot::Mutex::new(transport_id.to_owned()),
            close_timer: parking_lot::Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_new(&self) -> bool {
        self.is_new.load(Ordering::Acquire)
    }

    fn set_new(&self, is_new: bool) {
        self.is_new.store(is_new, Ordering::Release);
    }

    /// Returns true when this is not the first request dispatched on the
    /// session.
    fn mark_served(&self) -> bool {
        self.served.swap(true, Ordering::AcqRel)
    }

    pub fn transport_id(&self) -> String {
        self.transport_id.lock().clone()
    }

    fn bind_transport(&self, transport_id: &str) {
        *self.transport_id.lock() = transport_id.to_owned();
    }

    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.lock().get(name).cloned()
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: Value) {
        self.attributes.lock().insert(name.into(), value);
    }

    fn cancel_close(&self) {
        if let Some(timer) = self.close_timer.lock().take() {
            timer.abort();
        }
    }
}

/// Server-side session table, indexed by session id and by the id of the
/// connection currently carrying each session.
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    close_grace: Duration,
}

struct RegistryInner {
    by_id: parking_lot::Mutex<HashMap<String, Arc<ServerSession>>>,
    by_transport: parking_lot::Mutex<HashMap<String, Arc<ServerSession>>>,
}

impl SessionRegistry {
    fn new(close_grace: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                by_id: parking_lot::Mutex::new(HashMap::new()),
                by_transport: parking_lot::Mutex::new(HashMap::new()),
            }),
            close_grace,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ServerSession>> {
        self.inner.by_id.lock().get(session_id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.by_id.lock().len()
    }

    fn create(&self, transport_id: &str) -> Arc<ServerSession> {
        let session_id = format!("{:032x}", rand::random::<u128>());
        let session = ServerSession::new(session_id.clone(), transport_id);
        self.inner
            .by_id
            .lock()
            .insert(session_id, Arc::clone(&session));
        self.inner
            .by_transport
            .lock()
            .insert(transport_id.to_owned(), Arc::clone(&session));
        session
    }

    fn resume(&self, session: &Arc<ServerSession>, transport_id: &str) {
        session.cancel_close();
        session.set_new(false);
        session.bind_transport(transport_id);
        self.inner
            .by_transport
            .lock()
            .insert(transport_id.to_owned(), Arc::clone(session));
    }

    /// Find the session a request belongs to, creating one when needed.
    fn resolve(
        &self,
        session_id: Option<&str>,
        transport_id: &str,
        method: &str,
    ) -> Arc<ServerSession> {
        if let Some(session_id) = session_id {
            if let Some(session) = self.get(session_id) {
                if session.transport_id() != transport_id {
                    self.resume(&session, transport_id);
                }
                return session;
            }
            warn!(session_id, method, "request for unknown session, creating a fresh one");
            return self.create(transport_id);
        }
        if let Some(session) = self.inner.by_transport.lock().get(transport_id).cloned() {
            return session;
        }
        self.create(transport_id)
    }

    /// The connection died. Its session gets a grace period to resume before
    /// it is forgotten.
    pub fn on_transport_closed(&self, transport_id: &str) {
        let Some(session) = self.inner.by_transport.lock().remove(transport_id) else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        let session_id = session.session_id().to_owned();
        let grace = self.close_grace;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            debug!(session_id = %session_id, "session expired without resumption");
            inner.by_id.lock().remove(&session_id);
        });
        *session.close_timer.lock() = Some(timer);
    }
}
