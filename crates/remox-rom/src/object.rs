//! Client-side handle for one remote object.
//!
//! A [`RemoteObject`] carries the reference string, the remote class name and
//! the event listeners attached to it. Handles are always `Arc`-shared and
//! come from the [`ObjectRegistry`]; two lookups of the same reference yield
//! the same allocation, so pointer equality mirrors remote identity.
//!
//! [`ObjectRegistry`]: crate::registry::ObjectRegistry

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

/// A server-push event delivered to listeners.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    pub event_type: String,
    pub object_ref: String,
    pub data: Value,
}

/// Receives events for one subscription. Listeners must not block; they run
/// on the event router's task.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: &RemoteEvent);
}

impl<F> EventListener for F
where
    F: Fn(&RemoteEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: &RemoteEvent) {
        self(event)
    }
}

struct ListenerEntry {
    subscription: String,
    listener: Arc<dyn EventListener>,
}

pub struct RemoteObject {
    object_ref: String,
    remote_class: String,
    /// Event type -> listeners, each tagged with its subscription id.
    listeners: parking_lot::Mutex<HashMap<String, Vec<ListenerEntry>>>,
}

impl RemoteObject {
    pub(crate) fn new(object_ref: String, remote_class: String) -> Arc<Self> {
        Arc::new(Self {
            object_ref,
            remote_class,
            listeners: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn object_ref(&self) -> &str {
        &self.object_ref
    }

    pub fn remote_class(&self) -> &str {
        &self.remote_class
    }

    pub(crate) fn add_listener(
        &self,
        event_type: &str,
        subscription: String,
        listener: Arc<dyn EventListener>,
    ) {
        self.listeners
            .lock()
            .entry(event_type.to_owned())
            .or_default()
            .push(ListenerEntry {
                subscription,
                listener,
            });
    }

    /// Remove the listener registered under `subscription`. Returns false if
    /// it was already gone, which is normal when unsubscribes race.
    pub(crate) fn remove_listener(&self, event_type: &str, subscription: &str) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.subscription != subscription);
        let removed = entries.len() < before;
        if entries.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    /// Deliver an event to matching listeners. When `subscription` is given,
    /// only that subscription's listener fires.
    pub(crate) fn fire(&self, event: &RemoteEvent, subscription: Option<&str>) {
        // Snapshot under the lock, invoke outside it: a listener may
        // subscribe or unsubscribe from inside its callback.
        let matched: Vec<Arc<dyn EventListener>> = {
            let listeners = self.listeners.lock();
            match listeners.get(&event.event_type) {
                Some(entries) => entries
                    .iter()
                    .filter(|e| subscription.is_none_or(|s| e.subscription == s))
                    .map(|e| Arc::clone(&e.listener))
                    .collect(),
                None => Vec::new(),
            }
        };
        trace!(
            object_ref = %self.object_ref,
            event_type = %event.event_type,
            listeners = matched.len(),
            "delivering event"
        );
        for listener in matched {
            listener.on_event(event);
        }
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("object_ref", &self.object_ref)
            .field("remote_class", &self.remote_class)
            .finish_non_exhaustive()
    }
}
