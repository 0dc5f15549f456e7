//! Distributed garbage collection: periodic keepalives for live references.
//!
//! The server releases any object it has not heard about for a while, so the
//! client must refresh every reference it still holds. One scheduler task
//! serves all references: a refcounted entry per reference plus a due-ordered
//! heap, woken early when a new reference arms a nearer deadline. No timer
//! per reference.
//!
//! Keepalive failures never reach callers. An object-not-found answer means
//! the server already dropped the object; the local entry is removed and the
//! stale callback runs exactly once, even with concurrent keepalives in
//! flight, because removing the map entry is the linearization point.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::client::RomClient;

#[derive(Clone, Debug)]
pub struct DgcConfig {
    /// Keepalive period for references registered without an explicit one.
    pub default_period: Duration,
}

impl Default for DgcConfig {
    fn default() -> Self {
        Self {
            default_period: Duration::from_secs(5),
        }
    }
}

/// Called when the server reports a reference gone; runs once per reference.
type StaleCallback = Box<dyn Fn(&str) + Send + Sync>;

pub struct DistributedGarbageCollector {
    inner: Arc<DgcInner>,
}

struct DgcInner {
    client: RomClient,
    config: DgcConfig,
    state: parking_lot::Mutex<SchedulerState>,
    wake: tokio::sync::Notify,
    shutdown: AtomicBool,
    on_stale: parking_lot::Mutex<Option<StaleCallback>>,
}

struct SchedulerState {
    entries: HashMap<String, Entry>,
    /// Min-heap of (due, ref). Entries are validated against the map on pop,
    /// so removed references just evaporate from the schedule.
    due: BinaryHeap<Reverse<(Instant, String)>>,
}

struct Entry {
    count: u32,
    period: Duration,
    next_due: Instant,
}

impl DistributedGarbageCollector {
    /// Build the collector and spawn its scheduler task.
    pub fn new(client: RomClient, config: DgcConfig) -> Self {
        let inner = Arc::new(DgcInner {
            client,
            config,
            state: parking_lot::Mutex::new(SchedulerState {
                entries: HashMap::new(),
                due: BinaryHeap::new(),
            }),
            wake: tokio::sync::Notify::new(),
            shutdown: AtomicBool::new(false),
            on_stale: parking_lot::Mutex::new(None),
        });
        tokio::spawn(run_scheduler(Arc::clone(&inner)));
        Self { inner }
    }

    pub fn set_on_stale(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.on_stale.lock() = Some(Box::new(callback));
    }

    pub fn register_reference(&self, object_ref: &str) {
        self.register_reference_with_period(object_ref, self.inner.config.default_period);
    }

    /// Register one more holder of `object_ref`. The first registration arms
    /// the keepalive schedule; later ones only bump the count.
    pub fn register_reference_with_period(&self, object_ref: &str, period: Duration) {
        let mut state = self.inner.state.lock();
        match state.entries.get_mut(object_ref) {
            Some(entry) => {
                entry.count += 1;
                trace!(object_ref, count = entry.count, "reference count bumped");
            }
            None => {
                let next_due = Instant::now() + period;
                state.entries.insert(
                    object_ref.to_owned(),
                    Entry {
                        count: 1,
                        period,
                        next_due,
                    },
                );
                state.due.push(Reverse((next_due, object_ref.to_owned())));
                drop(state);
                trace!(object_ref, ?period, "reference scheduled");
                self.inner.wake.notify_one();
            }
        }
    }

    /// Drop one holder of `object_ref`. When the count hits zero the entry is
    /// removed and no further keepalive is sent. Returns false if the
    /// reference was not registered.
    pub fn remove_reference(&self, object_ref: &str) -> bool {
        let mut state = self.inner.state.lock();
        match state.entries.get_mut(object_ref) {
            Some(entry) if entry.count > 1 => {
                entry.count -= 1;
                trace!(object_ref, count = entry.count, "reference count dropped");
                true
            }
            Some(_) => {
                state.entries.remove(object_ref);
                trace!(object_ref, "reference unscheduled");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, object_ref: &str) -> bool {
        self.inner.state.lock().entries.contains_key(object_ref)
    }

    pub fn reference_count(&self, object_ref: &str) -> u32 {
        self.inner
            .state
            .lock()
            .entries
            .get(object_ref)
            .map_or(0, |e| e.count)
    }

    /// Server said the object is gone; forget it locally. Exactly one caller
    /// per reference observes true.
    pub fn handle_stale(&self, object_ref: &str) -> bool {
        self.inner.handle_stale(object_ref)
    }

    /// Stop the scheduler. In-flight keepalives finish on their own.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_one();
    }
}

impl Drop for DistributedGarbageCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl DgcInner {
    fn handle_stale(&self, object_ref: &str) -> bool {
        let removed = self.state.lock().entries.remove(object_ref).is_some();
        if removed {
            debug!(object_ref, "stale reference dropped");
            if let Some(callback) = &*self.on_stale.lock() {
                callback(object_ref);
            }
        }
        removed
    }

    /// Pop every due reference, rescheduling each at pop time, and return the
    /// next deadline if any entry remains.
    fn take_due(&self) -> (Vec<String>, Option<Instant>) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut due_refs = Vec::new();
        let deadline = loop {
            let Some(Reverse((due, _))) = state.due.peek() else {
                break None;
            };
            let due = *due;
            if due > now {
                break Some(due);
            }
            let Some(Reverse((_, object_ref))) = state.due.pop() else {
                break None;
            };
            // Only the heap item matching the entry's own deadline is live;
            // anything else is a leftover from removal or rescheduling.
            let Some(entry) = state.entries.get_mut(&object_ref) else {
                continue;
            };
            if entry.next_due != due {
                continue;
            }
            entry.next_due = now + entry.period;
            let next_due = entry.next_due;
            state.due.push(Reverse((next_due, object_ref.clone())));
            due_refs.push(object_ref);
        };
        (due_refs, deadline)
    }
}

async fn run_scheduler(inner: Arc<DgcInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let (due_refs, deadline) = inner.take_due();
        for object_ref in due_refs {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                match inner.client.keep_alive(&object_ref).await {
                    Ok(()) => trace!(object_ref, "keepalive acknowledged"),
                    Err(e) if e.is_object_not_found() => {
                        inner.handle_stale(&object_ref);
                    }
                    Err(e) => debug!(object_ref, error = %e, "keepalive failed"),
                }
            });
        }
        tokio::select! {
            _ = inner.wake.notified() => {}
            () = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {}
        }
    }
    trace!("garbage collector scheduler finished");
}
