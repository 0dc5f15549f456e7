//! Reference-to-handle registry: the sole owner of [`RemoteObject`]s.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::object::RemoteObject;

#[derive(Default)]
pub struct ObjectRegistry {
    objects: parking_lot::Mutex<HashMap<String, Arc<RemoteObject>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, object_ref: &str) -> Option<Arc<RemoteObject>> {
        self.objects.lock().get(object_ref).cloned()
    }

    /// Look up `object_ref`, inserting a fresh handle if absent. The entry
    /// API makes racing callers converge on one allocation, so the same
    /// reference always resolves to the same `Arc`.
    pub fn get_or_create(&self, object_ref: &str, remote_class: &str) -> Arc<RemoteObject> {
        self.objects
            .lock()
            .entry(object_ref.to_owned())
            .or_insert_with(|| {
                trace!(object_ref, remote_class, "registering remote object handle");
                RemoteObject::new(object_ref.to_owned(), remote_class.to_owned())
            })
            .clone()
    }

    pub fn remove(&self, object_ref: &str) -> Option<Arc<RemoteObject>> {
        self.objects.lock().remove(object_ref)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_ref_resolves_to_same_handle() {
        let registry = ObjectRegistry::new();
        let a = registry.get_or_create("1_MediaPipeline", "MediaPipeline");
        let b = registry.get_or_create("1_MediaPipeline", "MediaPipeline");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_forgets_the_handle() {
        let registry = ObjectRegistry::new();
        let a = registry.get_or_create("1_MediaPipeline", "MediaPipeline");
        assert!(registry.remove("1_MediaPipeline").is_some());
        assert!(registry.get("1_MediaPipeline").is_none());
        let b = registry.get_or_create("1_MediaPipeline", "MediaPipeline");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
