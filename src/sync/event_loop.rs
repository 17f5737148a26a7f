// src/sync/event_loop.rs

//! Single-consumer dispatch thread.
//!
//! Components that must notify observers without running observer code on
//! their own internal threads push closures onto an [`EventLoop`]. The loop
//! thread runs them one after another, in push order, so everything routed
//! through one loop observes a single total order.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::errors::{Result, panic_message};

use super::observers::{Observers, SubscriptionId};
use super::queue::BlockingQueue;
use super::{deadline_after, remaining};

type Job = Box<dyn FnOnce(&LoopContext<'_>) -> anyhow::Result<()> + Send>;

/// Proof that code is running on an event loop thread.
///
/// Only the loop itself constructs this; it is handed to every dispatched
/// closure. Functions that must only run on the loop take it as a parameter.
pub struct LoopContext<'a> {
    event_loop: &'a Shared,
}

impl LoopContext<'_> {
    pub fn loop_name(&self) -> &str {
        &self.event_loop.name
    }
}

/// A closure dispatched by the loop panicked or returned an error.
#[derive(Debug, Clone)]
pub struct UnhandledFailure {
    pub loop_name: String,
    pub message: String,
}

struct Shared {
    name: String,
    queue: BlockingQueue<Job>,
    /// Pushed but not yet finished closures.
    outstanding: Mutex<usize>,
    drained: Condvar,
    unhandled: Observers<UnhandledFailure>,
    disposed: AtomicBool,
}

pub struct EventLoop {
    shared: Arc<Shared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    /// Spawn the loop thread.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            queue: BlockingQueue::new(),
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
            unhandled: Observers::new(),
            disposed: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("event-loop-{name}"))
            .spawn(move || run_loop(loop_shared))?;
        let thread_id = handle.thread().id();

        debug!(event_loop = %name, "event loop started");

        Ok(Self {
            shared,
            thread_id,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `f` for execution on the loop thread. Never runs `f`
    /// synchronously. Closures pushed after `dispose` are dropped.
    pub fn push<F>(&self, f: F)
    where
        F: FnOnce(&LoopContext<'_>) + Send + 'static,
    {
        self.push_job(Box::new(move |ctx| {
            f(ctx);
            Ok(())
        }));
    }

    /// Like [`push`](Self::push), but an `Err` returned by `f` is reported
    /// as an [`UnhandledFailure`].
    pub fn push_fallible<F>(&self, f: F)
    where
        F: FnOnce(&LoopContext<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.push_job(Box::new(f));
    }

    fn push_job(&self, job: Job) {
        if self.shared.disposed.load(Ordering::Acquire) {
            debug!(event_loop = %self.shared.name, "push after dispose; dropping closure");
            return;
        }
        *self.shared.outstanding.lock() += 1;
        self.shared.queue.enqueue(job);
    }

    /// Subscribe to failures of dispatched closures. Handlers run on the
    /// loop thread; a panicking handler is ignored.
    pub fn on_unhandled<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&UnhandledFailure) + Send + Sync + 'static,
    {
        self.shared.unhandled.subscribe(handler)
    }

    pub fn unsubscribe_unhandled(&self, id: SubscriptionId) -> bool {
        self.shared.unhandled.unsubscribe(id)
    }

    /// `true` when called from the loop's own thread.
    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Wait until no closure is pending or running (or the loop is
    /// disposed). Returns `false` on timeout. Calling this from the loop
    /// thread would wait for itself, so it returns `false` immediately there.
    pub fn wait_for_empty(&self, timeout: Option<Duration>) -> bool {
        if self.is_loop_thread() {
            return false;
        }

        let deadline = deadline_after(timeout);
        let mut outstanding = self.shared.outstanding.lock();

        while *outstanding > 0 && !self.is_disposed() {
            match remaining(deadline) {
                None => self.shared.drained.wait(&mut outstanding),
                Some(left) => {
                    if left.is_zero() {
                        return false;
                    }
                    self.shared.drained.wait_for(&mut outstanding, left);
                }
            }
        }
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop accepting closures, drop pending ones, and join the thread.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.queue.dispose();

        {
            let mut outstanding = self.shared.outstanding.lock();
            *outstanding = 0;
            self.shared.drained.notify_all();
        }

        if self.is_loop_thread() {
            debug!(event_loop = %self.shared.name, "dispose called on loop thread; not joining");
            return;
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(event_loop = %self.shared.name, "event loop thread panicked");
            }
        }
        debug!(event_loop = %self.shared.name, "event loop disposed");
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.shared.name)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn run_loop(shared: Arc<Shared>) {
    let ctx = LoopContext {
        event_loop: &shared,
    };

    while let Some(job) = shared.queue.dequeue_blocking(None) {
        trace!(event_loop = %shared.name, "dispatching closure");

        let failure = match catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        if let Some(message) = failure {
            error!(event_loop = %shared.name, %message, "unhandled failure in event loop closure");
            let report = UnhandledFailure {
                loop_name: shared.name.clone(),
                message,
            };
            let _ = catch_unwind(AssertUnwindSafe(|| shared.unhandled.emit(&report)));
        }

        let mut outstanding = shared.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            shared.drained.notify_all();
        }
    }

    trace!(event_loop = %shared.name, "event loop thread exiting");
}
