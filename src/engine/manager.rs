// src/engine/manager.rs

//! The dependency-aware scheduler.
//!
//! Configuration phase (not running): add tasks and working lines.
//!
//! `start()` validates everything up front, starts every working line,
//! builds one [`DependencyWatcher`] per task and dispatches the tasks that
//! are ready right away. Later tasks are dispatched when their watcher
//! reports `GotReady`.
//!
//! A run ends when no working line is busy and every task is terminal.
//! All bookkeeping driven by watchers and lines runs on the manager's
//! [`EventLoop`], and every [`ManagerEvent`] is published there as its own
//! loop job with no manager lock held.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dag::{DependencyWatcher, Task, TaskId, TaskState, WatcherEvent};
use crate::errors::{Result, TasklineError};
use crate::exec::WorkerFactory;
use crate::sync::{EventLoop, Observers, Signal, SubscriptionId};
use crate::types::ThreadPriority;

use super::working_line::WorkingLine;
use super::{LineEvent, ManagerEvent};

/// How long `dispose` waits for pending notifications to be delivered.
const DISPOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub struct TaskManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    name: String,
    event_loop: Arc<EventLoop>,
    state: Mutex<ManagerState>,
    /// Set while no run is active.
    idle: Signal,
    events: Arc<Observers<ManagerEvent>>,
    disposed: AtomicBool,
}

struct ManagedLine {
    line: Arc<WorkingLine>,
    /// Busy flag as last reported on the event loop.
    busy: bool,
}

#[derive(Default)]
struct ManagerState {
    tasks: Vec<Arc<Task>>,
    lines: Vec<ManagedLine>,
    watchers: HashMap<TaskId, DependencyWatcher>,
    running: bool,
    canceled: bool,
    busy_lines: usize,
    cancel_on_failure: bool,
}

impl ManagerState {
    fn line(&self, tag: &str) -> Option<&ManagedLine> {
        self.lines.iter().find(|l| l.line.tag() == tag)
    }
}

impl TaskManager {
    pub fn new() -> Result<Self> {
        Self::with_name("taskline")
    }

    /// `name` is used for the event loop thread and in logs.
    pub fn with_name(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let event_loop = Arc::new(EventLoop::new(name.clone())?);
        let events: Arc<Observers<ManagerEvent>> = Arc::new(Observers::new());

        let unhandled_events = Arc::clone(&events);
        event_loop.on_unhandled(move |failure| {
            unhandled_events.emit(&ManagerEvent::UnhandledFailure {
                message: failure.message.clone(),
            });
        });

        Ok(Self {
            inner: Arc::new(ManagerInner {
                name,
                event_loop,
                state: Mutex::new(ManagerState::default()),
                idle: Signal::manual(true),
                events,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribe to manager events. Handlers run on the manager's event
    /// loop thread, except for `Disposed`.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ManagerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn add_task(&self, task: Arc<Task>) -> Result<()> {
        let mut state = self.inner.configurable("tasks")?;
        debug!(task = %task.label(), line = %task.queue_tag(), "task added");
        state.tasks.push(task);
        Ok(())
    }

    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = Arc<Task>>) -> Result<()> {
        let mut state = self.inner.configurable("tasks")?;
        state.tasks.extend(tasks);
        Ok(())
    }

    pub fn clear_tasks(&self) -> Result<()> {
        let mut state = self.inner.configurable("tasks")?;
        state.tasks.clear();
        Ok(())
    }

    /// Register a working line. `queue_tag` must be unique.
    pub fn add_working_line(
        &self,
        queue_tag: impl Into<String>,
        factory: Arc<dyn WorkerFactory>,
        worker_count: usize,
        priority: ThreadPriority,
    ) -> Result<()> {
        let queue_tag = queue_tag.into();
        let mut state = self.inner.configurable("working lines")?;
        if state.line(&queue_tag).is_some() {
            return Err(TasklineError::DuplicateQueueTag(queue_tag));
        }

        let line = Arc::new(WorkingLine::new(
            queue_tag.clone(),
            factory,
            worker_count,
            priority,
            Arc::clone(&self.inner.event_loop),
        ));

        let weak = Arc::downgrade(&self.inner);
        let tag = queue_tag.clone();
        line.subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_line_event(&tag, event);
            }
        });

        state.lines.push(ManagedLine { line, busy: false });
        info!(manager = %self.inner.name, line = %queue_tag, workers = worker_count, "working line added");
        Ok(())
    }

    /// Cancel the whole run on the first work-unit failure.
    pub fn set_cancel_on_failure(&self, enabled: bool) -> Result<()> {
        let mut state = self.inner.configurable("cancel_on_failure")?;
        state.cancel_on_failure = enabled;
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.inner.state.lock().tasks.clone()
    }

    pub fn working_line_tags(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .lines
            .iter()
            .map(|l| l.line.tag().to_string())
            .collect()
    }

    /// Run `f` against the working line registered for `tag`.
    pub fn with_working_line<R>(&self, tag: &str, f: impl FnOnce(&WorkingLine) -> R) -> Option<R> {
        let line = self.inner.state.lock().line(tag).map(|l| Arc::clone(&l.line))?;
        Some(f(&line))
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Working lines currently busy, as seen by the event loop.
    pub fn busy_working_lines(&self) -> usize {
        self.inner.state.lock().busy_lines
    }

    /// Start a run. Nothing is changed when validation fails.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if inner.is_disposed() {
            return Err(TasklineError::Disposed(format!("task manager '{}'", inner.name)));
        }
        if state.running {
            return Err(TasklineError::AlreadyRunning);
        }
        for task in &state.tasks {
            let current = task.state();
            if current != TaskState::Waiting {
                return Err(TasklineError::TaskNotWaiting {
                    label: task.label().to_string(),
                    state: current,
                });
            }
            if state.line(task.queue_tag()).is_none() {
                return Err(TasklineError::MissingWorkingLine {
                    label: task.label().to_string(),
                    tag: task.queue_tag().to_string(),
                });
            }
        }

        for managed in &state.lines {
            managed.line.start()?;
        }

        state.running = true;
        state.canceled = false;
        inner.idle.reset();
        info!(manager = %inner.name, tasks = state.tasks.len(), lines = state.lines.len(), "task manager started");
        inner.publish(ManagerEvent::Started);
        inner.publish(ManagerEvent::RunningChanged(true));

        if state.tasks.is_empty() {
            drop(state);
            inner.finish_run();
            return Ok(());
        }

        let tasks = state.tasks.clone();
        let mut watchers = HashMap::with_capacity(tasks.len());
        for task in &tasks {
            let watcher = DependencyWatcher::new(Arc::clone(task));
            let weak = Arc::downgrade(inner);
            let task_id = task.id();
            watcher.subscribe(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_watcher_event(task_id, *event);
                }
            });
            watchers.insert(task_id, watcher);
        }
        state.watchers = watchers;

        let mut dispatched = 0usize;
        for task in &tasks {
            let claimed = state
                .watchers
                .get(&task.id())
                .is_some_and(DependencyWatcher::claim_dispatch);
            if !claimed {
                continue;
            }
            if let Some(managed) = state.line(task.queue_tag()) {
                managed.line.enqueue(Arc::clone(task));
                dispatched += 1;
            }
        }
        debug!(manager = %inner.name, dispatched, "initial dispatch done");
        drop(state);

        // Nothing dispatched means no line will ever report activity, so
        // the end of the run has to be checked explicitly.
        if dispatched == 0 {
            let weak = Arc::downgrade(inner);
            inner.event_loop.push(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.check_end_of_run();
                }
            });
        }
        Ok(())
    }

    /// Cancel the active run. Queued and not yet ready tasks become
    /// Obsolete; running tasks are asked to stop through their cancellation
    /// signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Block until no run is active. Returns `false` on timeout. Pending
    /// notifications may still be queued on the event loop.
    pub fn wait_for_end(&self, timeout: Option<Duration>) -> bool {
        self.inner.idle.wait(timeout)
    }

    /// Wait until every pending notification has been delivered. Returns
    /// `false` on timeout or when called from an event handler.
    pub fn wait_for_notifications(&self, timeout: Option<Duration>) -> bool {
        self.inner.event_loop.wait_for_empty(timeout)
    }

    /// Cancel an active run, dispose every working line and the event loop,
    /// then publish `Disposed` synchronously. Idempotent.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.is_disposed() {
            return;
        }
        inner.cancel();
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let lines: Vec<Arc<WorkingLine>> = {
            let mut state = inner.state.lock();
            state.busy_lines = 0;
            state.lines.drain(..).map(|managed| managed.line).collect()
        };

        // Joins the worker threads, so canceled work units get to return.
        for line in &lines {
            line.dispose();
        }
        inner.finish_run();

        if !inner.event_loop.wait_for_empty(Some(DISPOSE_FLUSH_TIMEOUT)) {
            debug!(manager = %inner.name, "pending notifications dropped on dispose");
        }
        inner.event_loop.dispose();
        inner.idle.set();

        info!(manager = %inner.name, "task manager disposed");
        inner.events.emit(&ManagerEvent::Disposed);
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskManager")
            .field("name", &self.inner.name)
            .field("tasks", &state.tasks.len())
            .field("lines", &state.lines.len())
            .field("running", &state.running)
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Lock the state for a configuration change.
    fn configurable(
        &self,
        what: &'static str,
    ) -> Result<parking_lot::MutexGuard<'_, ManagerState>> {
        if self.is_disposed() {
            return Err(TasklineError::Disposed(format!("task manager '{}'", self.name)));
        }
        let state = self.state.lock();
        if state.running {
            return Err(TasklineError::ConfigurationLocked(what));
        }
        Ok(state)
    }

    fn publish(&self, event: ManagerEvent) {
        let events = Arc::clone(&self.events);
        self.event_loop.push(move |_| events.emit(&event));
    }

    fn cancel(self: &Arc<Self>) {
        let (lines, unclaimed) = {
            let mut state = self.state.lock();
            if !state.running || state.canceled {
                return;
            }
            state.canceled = true;
            let lines: Vec<Arc<WorkingLine>> =
                state.lines.iter().map(|l| Arc::clone(&l.line)).collect();
            let unclaimed: Vec<Arc<Task>> = state
                .watchers
                .values()
                .filter(|w| !w.is_dispatch_claimed())
                .map(|w| Arc::clone(w.task()))
                .collect();
            (lines, unclaimed)
        };

        info!(manager = %self.name, "canceling run");

        for line in &lines {
            line.cancel();
        }
        for task in &unclaimed {
            task.make_obsolete(None);
        }

        self.publish(ManagerEvent::Canceled);

        let weak = Arc::downgrade(self);
        self.event_loop.push(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.check_end_of_run();
            }
        });
    }

    /// Runs on the thread that changed the watched task; only hops to the
    /// event loop.
    fn on_watcher_event(self: &Arc<Self>, task_id: TaskId, event: WatcherEvent) {
        let weak: Weak<ManagerInner> = Arc::downgrade(self);
        self.event_loop.push(move |_| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                WatcherEvent::GotReady => inner.dispatch(task_id),
                WatcherEvent::GotObsolete => inner.check_end_of_run(),
            }
        });
    }

    /// Event loop only.
    fn dispatch(&self, task_id: TaskId) {
        let state = self.state.lock();
        if !state.running {
            return;
        }
        let Some(watcher) = state.watchers.get(&task_id) else {
            return;
        };
        if !watcher.claim_dispatch() {
            return;
        }
        let task = Arc::clone(watcher.task());

        if state.canceled {
            drop(state);
            debug!(task = %task.label(), "ready during cancellation; making obsolete");
            task.make_obsolete(None);
            return;
        }

        match state.line(task.queue_tag()) {
            Some(managed) => managed.line.enqueue(task),
            None => warn!(task = %task.label(), line = %task.queue_tag(), "no working line for ready task"),
        }
    }

    /// Event loop only.
    fn on_line_event(self: &Arc<Self>, tag: &str, event: &LineEvent) {
        match event {
            LineEvent::BusyChanged { new, .. } => self.on_line_busy(tag, *new),
            LineEvent::TaskBegin(task) => self.publish(ManagerEvent::TaskBegin {
                line: tag.to_string(),
                task: Arc::clone(task),
            }),
            LineEvent::TaskEnd(task) => self.publish(ManagerEvent::TaskEnd {
                line: tag.to_string(),
                task: Arc::clone(task),
            }),
            LineEvent::TaskRejected { task, state } => self.publish(ManagerEvent::TaskRejected {
                line: tag.to_string(),
                task: Arc::clone(task),
                state: *state,
            }),
            LineEvent::WorkerError { task, error } => {
                self.publish(ManagerEvent::WorkerError {
                    line: tag.to_string(),
                    task: Arc::clone(task),
                    error: Arc::clone(error),
                });
                if self.state.lock().cancel_on_failure {
                    warn!(manager = %self.name, task = %task.label(), "task failed; canceling run");
                    self.cancel();
                }
            }
            LineEvent::BusyWorkerCountChanged { .. } | LineEvent::Canceled => {}
        }
    }

    fn on_line_busy(&self, tag: &str, busy: bool) {
        let (old, new) = {
            let mut state = self.state.lock();
            let Some(managed) = state.lines.iter_mut().find(|l| l.line.tag() == tag) else {
                return;
            };
            if managed.busy == busy {
                return;
            }
            managed.busy = busy;
            let old = state.busy_lines;
            let new = state.lines.iter().filter(|l| l.busy).count();
            state.busy_lines = new;
            (old, new)
        };

        if old != new {
            self.publish(ManagerEvent::BusyWorkingLinesChanged { old, new });
        }
        if new == 0 {
            self.check_end_of_run();
        }
    }

    /// Finish the run once no line is busy and every task is terminal.
    fn check_end_of_run(&self) {
        {
            let state = self.state.lock();
            if !state.running || state.busy_lines > 0 {
                return;
            }
            if let Some(pending) = state.tasks.iter().find(|t| !t.state().is_terminal()) {
                debug!(manager = %self.name, task = %pending.label(), state = %pending.state(), "run not finished yet");
                return;
            }
        }
        self.finish_run();
    }

    fn finish_run(&self) {
        let watchers = {
            let mut state = self.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            std::mem::take(&mut state.watchers)
        };
        drop(watchers);

        info!(manager = %self.name, "run finished");
        self.publish(ManagerEvent::RunningChanged(false));
        self.publish(ManagerEvent::Finished);
        self.idle.set();
    }
}
