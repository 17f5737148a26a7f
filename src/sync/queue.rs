// src/sync/queue.rs

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::observers::{Observers, SubscriptionId};
use super::{deadline_after, remaining};

/// Transition notifications emitted by a [`BlockingQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The queue went from empty to non-empty.
    NewItem,
    /// A removal left the queue empty.
    Empty,
    /// The queue was disposed.
    Disposed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    disposed: bool,
}

/// Thread-safe FIFO with blocking and non-blocking dequeue.
///
/// All mutation happens under one lock. Observers are notified after the
/// lock has been released, on the thread that caused the transition.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    empty: Condvar,
    observers: Observers<QueueEvent>,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                disposed: false,
            }),
            not_empty: Condvar::new(),
            empty: Condvar::new(),
            observers: Observers::new(),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn enqueue(&self, item: T) {
        let became_non_empty = {
            let mut state = self.state.lock();
            if state.disposed {
                trace!("enqueue on disposed queue; dropping item");
                return;
            }
            let was_empty = state.items.is_empty();
            state.items.push_back(item);
            self.not_empty.notify_one();
            was_empty
        };

        if became_non_empty {
            self.observers.emit(&QueueEvent::NewItem);
        }
    }

    /// Remove and return the head without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let (item, became_empty) = {
            let mut state = self.state.lock();
            self.pop_locked(&mut state)
        };

        if became_empty {
            self.observers.emit(&QueueEvent::Empty);
        }
        item
    }

    /// Dequeue, waiting for an item if necessary.
    ///
    /// Returns `None` when the queue is disposed, or when a finite `timeout`
    /// elapses without an item becoming available. With `timeout = None` the
    /// only way to get `None` is disposal.
    pub fn dequeue_blocking(&self, timeout: Option<Duration>) -> Option<T> {
        let deadline = deadline_after(timeout);

        let (item, became_empty) = {
            let mut state = self.state.lock();
            loop {
                if state.disposed {
                    return None;
                }
                let (item, became_empty) = self.pop_locked(&mut state);
                if item.is_some() {
                    break (item, became_empty);
                }
                match remaining(deadline) {
                    None => self.not_empty.wait(&mut state),
                    Some(left) => {
                        if left.is_zero() {
                            return None;
                        }
                        self.not_empty.wait_for(&mut state, left);
                    }
                }
            }
        };

        if became_empty {
            self.observers.emit(&QueueEvent::Empty);
        }
        item
    }

    /// Block until the queue is empty (or disposed). Returns `false` on
    /// timeout.
    pub fn wait_for_empty(&self, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();

        while !state.disposed && !state.items.is_empty() {
            match remaining(deadline) {
                None => self.empty.wait(&mut state),
                Some(left) => {
                    if left.is_zero() {
                        return false;
                    }
                    self.empty.wait_for(&mut state, left);
                }
            }
        }
        true
    }

    /// Atomically remove every queued item.
    pub fn drain_all(&self) -> Vec<T> {
        let drained: Vec<T> = {
            let mut state = self.state.lock();
            let drained = state.items.drain(..).collect::<Vec<_>>();
            if !drained.is_empty() {
                self.empty.notify_all();
            }
            drained
        };

        if !drained.is_empty() {
            self.observers.emit(&QueueEvent::Empty);
        }
        drained
    }

    /// Wake every waiter and drop queued items. Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.items.clear();
            self.not_empty.notify_all();
            self.empty.notify_all();
        }
        self.observers.emit(&QueueEvent::Disposed);
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    fn pop_locked(&self, state: &mut QueueState<T>) -> (Option<T>, bool) {
        match state.items.pop_front() {
            Some(item) => {
                let became_empty = state.items.is_empty();
                if became_empty {
                    self.empty.notify_all();
                }
                (Some(item), became_empty)
            }
            None => (None, false),
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockingQueue")
            .field("len", &state.items.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}
