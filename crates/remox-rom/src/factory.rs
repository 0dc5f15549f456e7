//! The remote object factory: client + registry + garbage collection wired
//! into one entry point.
//!
//! A [`RomFactory`] owns the object registry and the keepalive collector and
//! installs the event router on its session, so a constructed factory is a
//! complete ROM endpoint. Handles obtained through it are registered with the
//! collector; releasing them through it keeps all three layers consistent.

use std::sync::Arc;

use remox_core::{Dispatcher, DispatcherConfig, ProtocolError, RpcError, RpcSession};
use serde_json::Value;
use tracing::debug;

use crate::client::RomClient;
use crate::dgc::{DgcConfig, DistributedGarbageCollector};
use crate::events::RomEventRouter;
use crate::object::{EventListener, RemoteObject};
use crate::ops::{ONEVENT_METHOD, Props};
use crate::registry::ObjectRegistry;

pub struct RomFactory {
    client: RomClient,
    registry: Arc<ObjectRegistry>,
    dgc: DistributedGarbageCollector,
    dispatcher: Arc<Dispatcher>,
}

impl RomFactory {
    /// Build a factory over `session` and install the `onEvent` router on it.
    pub fn new(session: Arc<RpcSession>, dgc_config: DgcConfig) -> Arc<Self> {
        let client = RomClient::new(Arc::clone(&session));
        let registry = Arc::new(ObjectRegistry::new());
        let dgc = DistributedGarbageCollector::new(client.clone(), dgc_config);
        {
            // A reference the server no longer knows is useless locally too.
            let registry = Arc::clone(&registry);
            dgc.set_on_stale(move |object_ref| {
                registry.remove(object_ref);
            });
        }

        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        dispatcher.register(
            ONEVENT_METHOD,
            Arc::new(RomEventRouter::new(Arc::clone(&registry))),
        );
        session.attach_dispatcher(Arc::clone(&dispatcher), "rom-client");

        Arc::new(Self {
            client,
            registry,
            dgc,
            dispatcher,
        })
    }

    pub fn client(&self) -> &RomClient {
        &self.client
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn dgc(&self) -> &DistributedGarbageCollector {
        &self.dgc
    }

    /// Dispatcher serving inbound requests on the factory's session; extra
    /// handlers may be registered on it.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Start a fluent constructor call for `remote_class`. Parameters
    /// accumulate locally; only the terminal [`CreateBuilder::build`] talks
    /// to the server.
    pub fn build(self: &Arc<Self>, remote_class: &str) -> CreateBuilder {
        CreateBuilder {
            factory: Arc::clone(self),
            remote_class: remote_class.to_owned(),
            constructor_params: Props::new(),
        }
    }

    /// Instantiate a remote object and register its handle.
    pub async fn create(
        &self,
        remote_class: &str,
        constructor_params: Props,
    ) -> Result<Arc<RemoteObject>, RpcError> {
        let object_ref = self.client.create(remote_class, constructor_params).await?;
        Ok(self.adopt(&object_ref, remote_class))
    }

    /// Handle for a reference obtained out of band (e.g. from an invoke
    /// result). Registers a keepalive holder like `create` does.
    pub fn get_by_ref(&self, object_ref: &str, remote_class: &str) -> Arc<RemoteObject> {
        self.adopt(object_ref, remote_class)
    }

    /// Resolve a reference carried in a response to a handle this client
    /// already holds. Unlike [`get_by_ref`], the reference must be known: a
    /// server answer naming an object this client has never seen means the
    /// two sides disagree about the object graph, which is fatal to the
    /// affected call and never retried.
    ///
    /// [`get_by_ref`]: RomFactory::get_by_ref
    pub fn resolve_ref(&self, object_ref: &str) -> Result<Arc<RemoteObject>, RpcError> {
        self.registry.get(object_ref).ok_or_else(|| {
            RpcError::Protocol(ProtocolError::UnknownObject(object_ref.to_owned()))
        })
    }

    fn adopt(&self, object_ref: &str, remote_class: &str) -> Arc<RemoteObject> {
        let object = self.registry.get_or_create(object_ref, remote_class);
        self.dgc.register_reference(object_ref);
        object
    }

    /// Invoke an operation on `object`. An object-not-found answer drops the
    /// local state for the reference before surfacing the error.
    pub async fn invoke(
        &self,
        object: &RemoteObject,
        operation: &str,
        operation_params: Props,
    ) -> Result<Value, RpcError> {
        let result = self
            .client
            .invoke(object.object_ref(), operation, operation_params)
            .await;
        self.note_stale(object.object_ref(), &result);
        result
    }

    /// Subscribe `listener` to `event_type` on `object`.
    pub async fn subscribe(
        &self,
        object: &RemoteObject,
        event_type: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<String, RpcError> {
        let result = self.client.subscribe(object.object_ref(), event_type).await;
        self.note_stale(object.object_ref(), &result);
        let subscription = result?;
        object.add_listener(event_type, subscription.clone(), listener);
        Ok(subscription)
    }

    pub async fn unsubscribe(
        &self,
        object: &RemoteObject,
        event_type: &str,
        subscription: &str,
    ) -> Result<(), RpcError> {
        let result = self
            .client
            .unsubscribe(object.object_ref(), subscription)
            .await;
        self.note_stale(object.object_ref(), &result);
        result?;
        object.remove_listener(event_type, subscription);
        Ok(())
    }

    /// Release `object` on the server and locally. A server that already
    /// forgot the object is treated as success.
    pub async fn release(&self, object: &RemoteObject) -> Result<(), RpcError> {
        let object_ref = object.object_ref();
        match self.client.release(object_ref).await {
            Ok(()) => {
                self.registry.remove(object_ref);
                self.dgc.remove_reference(object_ref);
                Ok(())
            }
            Err(e) if e.is_object_not_found() => {
                debug!(object_ref, "released an already-gone object");
                self.dgc.handle_stale(object_ref);
                self.registry.remove(object_ref);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Drop local state for a reference the server reported gone.
    fn note_stale<T>(&self, object_ref: &str, result: &Result<T, RpcError>) {
        if let Err(e) = result {
            if e.is_object_not_found() {
                debug!(object_ref, "server reports object gone, dropping local state");
                self.dgc.handle_stale(object_ref);
                self.registry.remove(object_ref);
            }
        }
    }
}

/// Fluent constructor-parameter accumulator for [`RomFactory::build`].
pub struct CreateBuilder {
    factory: Arc<RomFactory>,
    remote_class: String,
    constructor_params: Props,
}

impl CreateBuilder {
    /// Add one named constructor parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constructor_params.insert(name.into(), value.into());
        self
    }

    /// Issue the `create` RPC and adopt the resulting handle.
    pub async fn build(self) -> Result<Arc<RemoteObject>, RpcError> {
        self.factory
            .create(&self.remote_class, self.constructor_params)
            .await
    }
}
