use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use chrono::{DateTime, Utc};

use crate::models::{ErrorKind, StatusSnapshot};

type StatusCallback = Arc<dyn Fn(&StatusSnapshot) + Send + Sync + 'static>;

struct BroadcasterInner {
    snapshot: StatusSnapshot,
    // Kind of the currently recorded error; a success of the same kind
    // clears it, successes of other kinds leave it alone.
    error_kind: Option<ErrorKind>,
    next_subscriber_id: u64,
    subscribers: HashMap<u64, StatusCallback>,
}

/// Maintains the current status snapshot and pushes a fresh copy to every
/// subscriber whenever an observable field changes.
///
/// Callbacks are invoked outside the internal lock, so a subscriber may
/// unsubscribe (itself or another subscription) from within a notification.
#[derive(Clone)]
pub struct StatusBroadcaster {
    inner: Arc<Mutex<BroadcasterInner>>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BroadcasterInner {
                snapshot: StatusSnapshot::default(),
                error_kind: None,
                next_subscriber_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.insert(id, Arc::new(callback));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        lock(&self.inner).snapshot.clone()
    }

    pub fn set_tracking(&self, is_tracking: bool) {
        self.update(|inner| {
            inner.snapshot.is_tracking = is_tracking;
        });
    }

    /// Projects the pending count read back from the queue; used at startup
    /// and after queue mutations.
    pub fn set_queue_size(&self, queue_size: u64) {
        self.update(|inner| {
            inner.snapshot.queue_size = queue_size;
        });
    }

    /// One successful capture: queue depth and battery refresh, a prior
    /// capture error clears, and an eviction (if any) surfaces as a storage
    /// error.
    pub fn record_capture(&self, pending: u64, battery: Option<u8>, evicted: Option<u64>) {
        self.update(|inner| {
            inner.snapshot.queue_size = pending;
            if battery.is_some() {
                inner.snapshot.battery_level = battery;
            }
            match evicted {
                Some(sequence) => {
                    inner.snapshot.last_error = Some(format!(
                        "queue at capacity; evicted oldest sample {sequence}"
                    ));
                    inner.error_kind = Some(ErrorKind::Storage);
                }
                None => {
                    clear_error_of_kind(inner, ErrorKind::Capture);
                    clear_error_of_kind(inner, ErrorKind::Storage);
                }
            }
        });
    }

    pub fn record_error(&self, kind: ErrorKind, message: String) {
        self.update(|inner| {
            inner.snapshot.last_error = Some(message);
            inner.error_kind = Some(kind);
        });
    }

    pub fn record_flush_success(&self, pending: u64, at: DateTime<Utc>) {
        self.update(|inner| {
            inner.snapshot.queue_size = pending;
            inner.snapshot.last_update = Some(at);
            clear_error_of_kind(inner, ErrorKind::Upload);
        });
    }

    fn update<F>(&self, apply: F)
    where
        F: FnOnce(&mut BroadcasterInner),
    {
        let notification = {
            let mut inner = lock(&self.inner);
            let before = inner.snapshot.clone();
            apply(&mut inner);
            if inner.snapshot == before {
                None
            } else {
                let callbacks: Vec<StatusCallback> =
                    inner.subscribers.values().cloned().collect();
                Some((inner.snapshot.clone(), callbacks))
            }
        };

        if let Some((snapshot, callbacks)) = notification {
            for callback in callbacks {
                callback(&snapshot);
            }
        }
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn clear_error_of_kind(inner: &mut BroadcasterInner, kind: ErrorKind) {
    if inner.error_kind == Some(kind) {
        inner.snapshot.last_error = None;
        inner.error_kind = None;
    }
}

// A poisoned lock only means a subscriber-free mutation panicked mid-update;
// the snapshot is still a plain value, so keep serving it.
fn lock(inner: &Arc<Mutex<BroadcasterInner>>) -> MutexGuard<'_, BroadcasterInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle returned by [`StatusBroadcaster::subscribe`]. Unsubscribing twice,
/// or after the broadcaster is gone, is a no-op.
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<BroadcasterInner>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut guard = match inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.subscribers.remove(&self.id);
        }
    }
}
