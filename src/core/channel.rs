//! Single-slot holder of the latest reading with change notification.
//!
//! One writer (the serial reader) publishes, any number of readers call
//! [`TemperatureChannel::read`]. The slot is replaced as a whole under a lock,
//! so a reader sees either the previous reading or the new one.
//!
//! Listeners run synchronously on the publishing thread, in registration
//! order, against a snapshot of the listener list. No lock is held while they
//! run, so a listener may subscribe or unsubscribe. It must not publish: the
//! fan-out is serialized with the slot update. A panicking listener is logged
//! and skipped; it never poisons the slot.

use crate::domain::reading::Temperature;
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Change listener, called with `(previous, current)`
pub type Listener = Arc<dyn Fn(Option<Temperature>, Temperature) + Send + Sync>;

/// Handle returned by [`TemperatureChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct ChannelInner {
    current: RwLock<Option<Temperature>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    // Serializes publish so notifications follow slot order.
    publish_lock: Mutex<()>,
    next_id: AtomicU64,
}

/// Cloneable handle; clones share the same slot and listeners.
#[derive(Clone)]
pub struct TemperatureChannel {
    inner: Arc<ChannelInner>,
}

impl TemperatureChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                current: RwLock::new(None),
                listeners: Mutex::new(Vec::new()),
                publish_lock: Mutex::new(()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Replace the current reading and notify every listener with `(old, new)`.
    pub fn publish(&self, reading: Temperature) {
        let _publishing = self.inner.publish_lock.lock();

        let previous = {
            let mut slot = self.inner.current.write();
            slot.replace(reading)
        };

        let listeners: Vec<(SubscriptionId, Listener)> = self.inner.listeners.lock().clone();
        debug!(
            "Published {} (previous: {:?}) to {} listener(s)",
            reading,
            previous.map(|p| p.value()),
            listeners.len()
        );

        for (id, listener) in listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(previous, reading)));
            if outcome.is_err() {
                error!("Temperature listener {:?} panicked; continuing fan-out", id);
            }
        }
    }

    /// Latest published reading, `None` until the first publish.
    pub fn read(&self) -> Option<Temperature> {
        *self.inner.current.read()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(Option<Temperature>, Temperature) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        debug!("Registered temperature listener {:?}", id);
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if removed {
            debug!("Removed temperature listener {:?}", id);
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl Default for TemperatureChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TemperatureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemperatureChannel")
            .field("current", &self.read())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
