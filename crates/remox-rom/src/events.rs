//! Server-push event routing.
//!
//! The server delivers object events as `onEvent` requests on the same
//! channel the client calls out on. The router resolves the target object
//! through the registry and fires its listeners. An event for an unknown
//! reference is dropped with a debug log: releasing an object races with
//! events already in flight, and losing those is normal.

use std::sync::Arc;

use futures::future::BoxFuture;
use remox_core::dispatcher::{RequestHandler, ServerSession};
use remox_core::{Request, RpcError, Transaction};
use serde_json::Value;
use tracing::debug;

use crate::client::unwrap_value;
use crate::object::RemoteEvent;
use crate::ops::{DATA_PROPERTY, OBJECT_PROPERTY, SUBSCRIPTION_PROPERTY, TYPE_PROPERTY};
use crate::registry::ObjectRegistry;

pub struct RomEventRouter {
    registry: Arc<ObjectRegistry>,
}

impl RomEventRouter {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self { registry }
    }

    fn route(&self, params: Option<Value>) {
        let Some(params) = params else {
            debug!("event without params dropped");
            return;
        };
        // The payload may sit one level down in a "value" envelope.
        let Value::Object(payload) = unwrap_value(params) else {
            debug!("event with non-object payload dropped");
            return;
        };
        let Some(object_ref) = payload.get(OBJECT_PROPERTY).and_then(Value::as_str) else {
            debug!("event without object reference dropped");
            return;
        };
        let Some(event_type) = payload.get(TYPE_PROPERTY).and_then(Value::as_str) else {
            debug!(object_ref, "event without type dropped");
            return;
        };
        let subscription = payload.get(SUBSCRIPTION_PROPERTY).and_then(Value::as_str);
        let data = payload.get(DATA_PROPERTY).cloned().unwrap_or(Value::Null);

        match self.registry.get(object_ref) {
            Some(object) => {
                let event = RemoteEvent {
                    event_type: event_type.to_owned(),
                    object_ref: object_ref.to_owned(),
                    data,
                };
                object.fire(&event, subscription);
            }
            None => {
                // Normal when a release raced with an event in flight.
                debug!(object_ref, event_type, "event for unknown object dropped");
            }
        }
    }
}

impl RequestHandler for RomEventRouter {
    fn handle(
        &self,
        transaction: Transaction,
        _session: Arc<ServerSession>,
        request: Request,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        self.route(request.params);
        Box::pin(async move {
            if !transaction.is_notification() {
                transaction.send_void_response().await?;
            }
            Ok(())
        })
    }
}
