//! Collects events delivered to an observer so tests can assert on them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct Inner<E> {
    events: Mutex<Vec<E>>,
    changed: Condvar,
}

/// Thread-safe event log. Clones share the same log.
pub struct Recorder<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Recorder<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for Recorder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> Recorder<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                events: Mutex::new(Vec::new()),
                changed: Condvar::new(),
            }),
        }
    }

    /// An observer closure appending every event to this log.
    pub fn handler(&self) -> impl Fn(&E) + Send + Sync + 'static {
        let inner = Arc::clone(&self.inner);
        move |event: &E| {
            inner.events.lock().push(event.clone());
            inner.changed.notify_all();
        }
    }

    pub fn events(&self) -> Vec<E> {
        self.inner.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.events.lock().clear();
    }

    /// Block until `condition` holds for the recorded events. Returns `false`
    /// on timeout.
    pub fn wait_for(&self, timeout: Duration, condition: impl Fn(&[E]) -> bool) -> bool {
        let mut events = self.inner.events.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !condition(&events) {
            if self.inner.changed.wait_until(&mut events, deadline).timed_out() {
                return condition(&events);
            }
        }
        true
    }
}
