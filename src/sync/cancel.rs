// src/sync/cancel.rs

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::observers::{Observers, SubscriptionId};

/// One-shot cooperative cancellation flag.
///
/// Clones share the same flag. The first [`cancel`](Self::cancel) sets the
/// flag and notifies subscribers exactly once, no matter how many threads
/// race on it. Work units are expected to poll
/// [`is_canceled`](Self::is_canceled).
#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    observers: Observers<()>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self
            .inner
            .canceled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.observers.emit(&());
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Register a callback for the cancellation. It runs on the thread that
    /// called `cancel`. A signal that is already canceled never fires again.
    pub fn on_cancel<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(move |_| handler())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
