//! Scripted in-process remote object server.
//!
//! [`RomServerMock`] implements the object-server side of the wire contract:
//! `create` hands out refs like `"1_MediaPipeline"`, `invoke` supports a
//! small fixed set of operations, `release` makes a ref answer
//! object-not-found from then on, and `keepAlive` counts arrivals per ref.
//! Tests use the control surface (`destroy`, `keepalive_count`,
//! `fire_event`) to script server behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use remox_core::dispatcher::{RequestHandler, ServerSession};
use remox_core::{
    Dispatcher, DispatcherConfig, Request, ResponseError, RpcError, RpcSession, Transaction, codes,
};
use serde_json::{Value, json};
use tracing::debug;

use crate::harness::spawn_server_with;
use remox_core::transport::mem::MemDialer;

pub struct RomServerMock {
    state: parking_lot::Mutex<MockState>,
    /// When set, `subscribe` answers with a JSON array, which is not a legal
    /// subscription id shape.
    bad_subscribe: AtomicBool,
    sessions: parking_lot::Mutex<Vec<Arc<RpcSession>>>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    next_subscription: u64,
    objects: HashMap<String, MockObject>,
}

#[derive(Default)]
struct MockObject {
    destroyed: bool,
    keepalives: u32,
}

impl RomServerMock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: parking_lot::Mutex::new(MockState::default()),
            bad_subscribe: AtomicBool::new(false),
            sessions: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Make `subscribe` answer with a malformed payload.
    pub fn set_bad_subscribe(&self, bad: bool) {
        self.bad_subscribe.store(bad, Ordering::Release);
    }

    /// Drop an object server-side without a release request, as if the
    /// server garbage-collected it.
    pub fn destroy(&self, object_ref: &str) {
        if let Some(object) = self.state.lock().objects.get_mut(object_ref) {
            object.destroyed = true;
        }
    }

    pub fn exists(&self, object_ref: &str) -> bool {
        self.state
            .lock()
            .objects
            .get(object_ref)
            .is_some_and(|o| !o.destroyed)
    }

    pub fn keepalive_count(&self, object_ref: &str) -> u32 {
        self.state
            .lock()
            .objects
            .get(object_ref)
            .map_or(0, |o| o.keepalives)
    }

    /// Push an `onEvent` notification for `object_ref` down the most recent
    /// connection.
    pub async fn fire_event(
        &self,
        object_ref: &str,
        event_type: &str,
        data: Value,
    ) -> Result<(), RpcError> {
        let session = self
            .sessions
            .lock()
            .last()
            .cloned()
            .expect("no connection to push events on");
        session
            .notify(
                "onEvent",
                Some(json!({
                    "value": {
                        "object": object_ref,
                        "type": event_type,
                        "data": data,
                    }
                })),
            )
            .await
    }

    fn track_session(&self, session: &Arc<RpcSession>) {
        self.sessions.lock().push(Arc::clone(session));
    }

    fn process(&self, request: &Request) -> Result<Value, ResponseError> {
        let params = request.params.as_ref().and_then(Value::as_object);
        let param = |key: &str| params.and_then(|p| p.get(key));
        let str_param =
            |key: &str| param(key).and_then(Value::as_str).map(str::to_owned);

        match request.method.as_str() {
            "create" => {
                let remote_class = str_param("type")
                    .ok_or_else(|| invalid_params("create without type"))?;
                let mut state = self.state.lock();
                let object_ref = allocate(&mut state, &remote_class);
                debug!(object_ref, "mock created object");
                Ok(json!(object_ref))
            }
            "invoke" => {
                let object = str_param("object")
                    .ok_or_else(|| invalid_params("invoke without object"))?;
                let operation = str_param("operation")
                    .ok_or_else(|| invalid_params("invoke without operation"))?;
                let mut state = self.state.lock();
                if !state.objects.get(&object).is_some_and(|o| !o.destroyed) {
                    return Err(object_not_found(&object));
                }
                match operation.as_str() {
                    "newEndpoint" => {
                        let child = allocate(&mut state, "WebRtcEndpoint");
                        Ok(json!(child))
                    }
                    "echo" => Ok(param("operationParams").cloned().unwrap_or(Value::Null)),
                    "getUri" => Ok(json!("file:///test")),
                    "badScalar" => Ok(json!([1, 2, 3])),
                    other => Err(ResponseError::new(
                        codes::METHOD_NOT_FOUND,
                        format!("Unrecognized operation '{other}'"),
                    )),
                }
            }
            "subscribe" => {
                let object = str_param("object")
                    .ok_or_else(|| invalid_params("subscribe without object"))?;
                let mut state = self.state.lock();
                if !state.objects.get(&object).is_some_and(|o| !o.destroyed) {
                    return Err(object_not_found(&object));
                }
                if self.bad_subscribe.load(Ordering::Acquire) {
                    return Ok(json!(["not", "a", "subscription"]));
                }
                state.next_subscription += 1;
                Ok(json!(format!("sub{}", state.next_subscription)))
            }
            "unsubscribe" => Ok(Value::Null),
            "release" => {
                let object = str_param("object")
                    .ok_or_else(|| invalid_params("release without object"))?;
                let mut state = self.state.lock();
                match state.objects.get_mut(&object) {
                    Some(entry) if !entry.destroyed => {
                        entry.destroyed = true;
                        debug!(object_ref = %object, "mock released object");
                        Ok(Value::Null)
                    }
                    _ => Err(object_not_found(&object)),
                }
            }
            "keepAlive" => {
                let object = str_param("object")
                    .ok_or_else(|| invalid_params("keepAlive without object"))?;
                let mut state = self.state.lock();
                match state.objects.get_mut(&object) {
                    Some(entry) if !entry.destroyed => {
                        entry.keepalives += 1;
                        Ok(Value::Null)
                    }
                    _ => Err(object_not_found(&object)),
                }
            }
            other => Err(ResponseError::new(
                codes::METHOD_NOT_FOUND,
                format!("Unrecognized method '{other}'"),
            )),
        }
    }
}

fn allocate(state: &mut MockState, remote_class: &str) -> String {
    state.next_id += 1;
    let object_ref = format!("{}_{}", state.next_id, remote_class);
    state.objects.insert(object_ref.clone(), MockObject::default());
    object_ref
}

fn object_not_found(object_ref: &str) -> ResponseError {
    ResponseError::new(
        codes::OBJECT_NOT_FOUND,
        format!("Object '{object_ref}' not found"),
    )
}

fn invalid_params(message: &str) -> ResponseError {
    ResponseError::new(codes::INVALID_PARAMS, message)
}

impl RequestHandler for RomServerMock {
    fn handle(
        &self,
        transaction: Transaction,
        _session: Arc<ServerSession>,
        request: Request,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        let outcome = self.process(&request);
        Box::pin(async move {
            match outcome {
                Ok(result) => transaction.send_response(result).await,
                Err(error) => transaction.send_error(error).await,
            }
        })
    }
}

/// Serve `mock` behind a listener; every ROM method goes through it.
pub fn spawn_rom_server(mock: Arc<RomServerMock>) -> MemDialer {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.set_default_handler(Arc::clone(&mock) as Arc<dyn RequestHandler>);
    let tracker = Arc::clone(&mock);
    spawn_server_with(dispatcher, move |session| tracker.track_session(session))
}
