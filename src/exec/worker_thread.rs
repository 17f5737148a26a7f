// src/exec/worker_thread.rs

//! One worker slot: a dedicated OS thread executing tasks from a shared
//! queue, one at a time.
//!
//! Lifecycle: `NotStarted -> Running -> Stopped`. A stopped slot cannot be
//! restarted; build a new one instead.
//!
//! The thread loop:
//! 1. `try_dequeue` a task; when the queue is empty, mark the slot idle and
//!    sleep until the queue reports a new item, is disposed, or the slot is
//!    stopped.
//! 2. reject a task that is no longer `Waiting` (it lost a race against
//!    cancellation);
//! 3. otherwise move it to `InProgress`, hand it to the [`Worker`], and
//!    settle it as `Failed`, `Canceled` or `Succeeded` unless the worker
//!    already settled it.
//!
//! Events fire synchronously on the worker thread, except `Canceled` and
//! `AliveChanged(true)` which fire on the thread calling `cancel`/`start`.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::dag::{Task, TaskState};
use crate::errors::{Result, SharedError, TasklineError, WorkerPanic, panic_message, share_error};
use crate::sync::{
    BlockingQueue, CancellationSignal, Observers, QueueEvent, Signal, SubscriptionId,
};

use super::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    NotStarted,
    Running,
    Stopped,
}

/// Notifications published by a [`WorkerThread`].
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    AliveChanged(bool),
    BusyChanged { old: bool, new: bool },
    TaskBegin(Arc<Task>),
    TaskEnd(Arc<Task>),
    /// A dequeued task was no longer `Waiting` and was skipped.
    TaskRejected { task: Arc<Task>, state: TaskState },
    WorkerError { task: Arc<Task>, error: SharedError },
    Canceled,
}

struct Control {
    phase: WorkerPhase,
    cancel: CancellationSignal,
    canceled: bool,
    stop_requested: bool,
    busy: bool,
    current: Option<Arc<Task>>,
    thread_id: Option<ThreadId>,
}

struct WorkerShared {
    name: String,
    queue: Arc<BlockingQueue<Arc<Task>>>,
    control: Mutex<Control>,
    wake: Signal,
    idle: Signal,
    dead: Signal,
    events: Observers<WorkerEvent>,
}

pub struct WorkerThread {
    shared: Arc<WorkerShared>,
    worker: Mutex<Option<Box<dyn Worker>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    queue_subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

impl WorkerThread {
    /// Create a slot pulling from `queue`. The thread is spawned by
    /// [`start`](Self::start); `name` becomes the OS thread name.
    pub fn new(
        name: impl Into<String>,
        queue: Arc<BlockingQueue<Arc<Task>>>,
        worker: Box<dyn Worker>,
    ) -> Self {
        let shared = Arc::new(WorkerShared {
            name: name.into(),
            queue: Arc::clone(&queue),
            control: Mutex::new(Control {
                phase: WorkerPhase::NotStarted,
                cancel: CancellationSignal::new(),
                canceled: false,
                stop_requested: false,
                busy: false,
                current: None,
                thread_id: None,
            }),
            wake: Signal::auto(false),
            idle: Signal::manual(true),
            dead: Signal::manual(true),
            events: Observers::new(),
        });

        let weak: Weak<WorkerShared> = Arc::downgrade(&shared);
        let subscription = queue.subscribe(move |event| {
            if matches!(event, QueueEvent::NewItem | QueueEvent::Disposed) {
                if let Some(shared) = weak.upgrade() {
                    shared.wake.set();
                }
            }
        });

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
            handle: Mutex::new(None),
            queue_subscription: Mutex::new(Some(subscription)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn phase(&self) -> WorkerPhase {
        self.shared.control.lock().phase
    }

    pub fn is_alive(&self) -> bool {
        self.phase() == WorkerPhase::Running
    }

    pub fn is_busy(&self) -> bool {
        self.shared.control.lock().busy
    }

    pub fn current_task(&self) -> Option<Arc<Task>> {
        self.shared.control.lock().current.clone()
    }

    /// The signal handed to the work unit during the current run.
    pub fn cancellation(&self) -> CancellationSignal {
        self.shared.control.lock().cancel.clone()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Spawn the thread with a fresh cancellation signal.
    pub fn start(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TasklineError::Disposed(format!("worker '{}'", self.shared.name)));
        }

        {
            let mut control = self.shared.control.lock();
            if control.phase != WorkerPhase::NotStarted {
                return Err(TasklineError::AlreadyStarted(format!(
                    "worker '{}'",
                    self.shared.name
                )));
            }
            control.phase = WorkerPhase::Running;
            control.cancel = CancellationSignal::new();
        }

        let Some(worker) = self.worker.lock().take() else {
            return Err(TasklineError::AlreadyStarted(format!(
                "worker '{}'",
                self.shared.name
            )));
        };

        self.shared.dead.reset();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || run_worker(shared, worker));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.control.lock().phase = WorkerPhase::Stopped;
                self.shared.dead.set();
                return Err(err.into());
            }
        };

        self.shared.control.lock().thread_id = Some(handle.thread().id());
        *self.handle.lock() = Some(handle);

        debug!(worker = %self.shared.name, "worker thread started");
        self.shared.events.emit(&WorkerEvent::AliveChanged(true));
        Ok(())
    }

    /// Ask the thread to exit after its current task. A slot that never
    /// started becomes `Stopped`.
    pub fn stop(&self) {
        {
            let mut control = self.shared.control.lock();
            control.stop_requested = true;
            if control.phase == WorkerPhase::NotStarted {
                control.phase = WorkerPhase::Stopped;
            }
        }
        self.shared.wake.set();
    }

    /// Cancel the current run: signal the work unit and stop the loop.
    /// Idempotent; `Canceled` fires once.
    pub fn cancel(&self) {
        let (signal, first) = {
            let mut control = self.shared.control.lock();
            let first = !control.canceled;
            control.canceled = true;
            (control.cancel.clone(), first)
        };

        signal.cancel();
        self.stop();

        if first {
            info!(worker = %self.shared.name, "worker canceled");
            self.shared.events.emit(&WorkerEvent::Canceled);
        }
    }

    /// Wait until the slot is idle. Returns `false` on timeout.
    pub fn wait_for_end(&self, timeout: Option<Duration>) -> bool {
        self.shared.idle.wait(timeout)
    }

    /// Wait until the thread has exited (or never started). Returns `false`
    /// on timeout.
    pub fn wait_for_death(&self, timeout: Option<Duration>) -> bool {
        self.shared.dead.wait(timeout)
    }

    /// Stop the thread, join it, and detach from the queue. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop();

        if let Some(id) = self.queue_subscription.lock().take() {
            self.shared.queue.unsubscribe(id);
        }

        let on_own_thread = self.shared.control.lock().thread_id == Some(thread::current().id());
        if let Some(handle) = self.handle.lock().take() {
            if on_own_thread {
                debug!(worker = %self.shared.name, "dispose called on worker thread; not joining");
            } else if handle.join().is_err() {
                error!(worker = %self.shared.name, "worker thread panicked");
            }
        }

        self.worker.lock().take();
        debug!(worker = %self.shared.name, "worker disposed");
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for WorkerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let control = self.shared.control.lock();
        f.debug_struct("WorkerThread")
            .field("name", &self.shared.name)
            .field("phase", &control.phase)
            .field("busy", &control.busy)
            .finish_non_exhaustive()
    }
}

fn run_worker(shared: Arc<WorkerShared>, mut worker: Box<dyn Worker>) {
    loop {
        if shared.control.lock().stop_requested || shared.queue.is_disposed() {
            break;
        }

        match shared.queue.try_dequeue() {
            Some(task) => {
                let processed =
                    catch_unwind(AssertUnwindSafe(|| process_task(&shared, worker.as_mut(), task)));
                if let Err(payload) = processed {
                    let message = panic_message(payload.as_ref());
                    error!(worker = %shared.name, %message, "worker event handler panicked");
                    shared.control.lock().current = None;
                }
            }
            None => {
                shared.set_busy(false);
                shared.wake.wait(None);
            }
        }
    }

    shared.set_busy(false);
    {
        let mut control = shared.control.lock();
        control.current = None;
        control.phase = WorkerPhase::Stopped;
    }
    shared.dead.set();
    debug!(worker = %shared.name, "worker thread exiting");
    shared.events.emit(&WorkerEvent::AliveChanged(false));
}

fn process_task(shared: &WorkerShared, worker: &mut dyn Worker, task: Arc<Task>) {
    let observed = task.state();
    if observed != TaskState::Waiting {
        warn!(worker = %shared.name, task = %task.label(), state = %observed, "rejecting task that is not waiting");
        shared.events.emit(&WorkerEvent::TaskRejected { task, state: observed });
        return;
    }

    let cancel = {
        let mut control = shared.control.lock();
        control.current = Some(Arc::clone(&task));
        control.cancel.clone()
    };
    shared.set_busy(true);

    // Task observers run inside these transitions; a panicking observer must
    // not take the slot down with it.
    let started = catch_unwind(AssertUnwindSafe(|| task.update_state(TaskState::InProgress)));
    let mut failure: Option<SharedError> = match started {
        Ok(Ok(())) => None,
        Ok(Err(_)) => {
            reject_late_start(shared, task);
            return;
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(worker = %shared.name, task = %task.label(), %message, "task observer panicked while the task started");
            if task.state() != TaskState::InProgress {
                reject_late_start(shared, task);
                return;
            }
            Some(Arc::new(WorkerPanic(message)))
        }
    };

    debug!(worker = %shared.name, task = %task.label(), "task begin");
    shared.events.emit(&WorkerEvent::TaskBegin(Arc::clone(&task)));

    if failure.is_none() {
        let outcome = catch_unwind(AssertUnwindSafe(|| worker.process(&task, &cancel)));
        failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(share_error(err)),
            Err(payload) => Some(Arc::new(WorkerPanic(panic_message(payload.as_ref())))),
        };
    } else {
        debug!(worker = %shared.name, task = %task.label(), "skipping work unit after a failed start");
    }

    if task.state().is_active() {
        let settled = catch_unwind(AssertUnwindSafe(|| match &failure {
            Some(err) => task.update_state_with_error(TaskState::Failed, Arc::clone(err)),
            None if cancel.is_canceled() => task.update_state(TaskState::Canceled),
            None => task.update_state(TaskState::Succeeded),
        }));
        match settled {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(worker = %shared.name, task = %task.label(), error = %err, "could not settle task");
            }
            Err(payload) => {
                // The new state is stored before observers run.
                let message = panic_message(payload.as_ref());
                error!(worker = %shared.name, task = %task.label(), %message, "task observer panicked while the task settled");
                if failure.is_none() {
                    failure = Some(Arc::new(WorkerPanic(message)));
                }
            }
        }
    } else {
        debug!(worker = %shared.name, task = %task.label(), state = %task.state(), "work unit settled the task itself");
    }

    if let Some(error) = failure {
        error!(worker = %shared.name, task = %task.label(), error = %error, "work unit failed");
        shared.events.emit(&WorkerEvent::WorkerError {
            task: Arc::clone(&task),
            error,
        });
    }

    debug!(worker = %shared.name, task = %task.label(), state = %task.state(), "task end");
    shared.events.emit(&WorkerEvent::TaskEnd(Arc::clone(&task)));
    shared.control.lock().current = None;
}

fn reject_late_start(shared: &WorkerShared, task: Arc<Task>) {
    let state = task.state();
    warn!(worker = %shared.name, task = %task.label(), %state, "task left Waiting before it could start");
    shared.control.lock().current = None;
    shared.events.emit(&WorkerEvent::TaskRejected { task, state });
}

impl WorkerShared {
    fn set_busy(&self, busy: bool) {
        let old = {
            let mut control = self.control.lock();
            let old = control.busy;
            if old == busy {
                return;
            }
            control.busy = busy;
            old
        };

        if busy {
            self.idle.reset();
        }
        self.events.emit(&WorkerEvent::BusyChanged { old, new: busy });
        if !busy {
            self.idle.set();
        }
    }
}
