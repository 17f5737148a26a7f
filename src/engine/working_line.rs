// src/engine/working_line.rs

//! A named pool of worker threads sharing one task queue.
//!
//! The line aggregates the busy flags of its slots into
//! `busy_worker_count`; `is_busy` flips exactly at the 0 <-> 1 boundary.
//! Slot events are re-published as [`LineEvent`]s on the event loop:
//! on 0 -> n `BusyChanged` comes before `BusyWorkerCountChanged`, on
//! n -> 0 it comes after.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::dag::Task;
use crate::errors::{Result, TasklineError};
use crate::exec::{WorkerEvent, WorkerFactory, WorkerPhase, WorkerThread};
use crate::sync::{BlockingQueue, EventLoop, Observers, Signal, SubscriptionId};
use crate::sync::{deadline_after, remaining};
use crate::types::ThreadPriority;

use super::{LineEvent, MAX_WORKERS};

pub struct WorkingLine {
    inner: Arc<LineInner>,
}

struct LineInner {
    tag: String,
    priority: ThreadPriority,
    factory: Arc<dyn WorkerFactory>,
    event_loop: Arc<EventLoop>,
    queue: Arc<BlockingQueue<Arc<Task>>>,
    slots: Mutex<Vec<WorkerThread>>,
    state: Mutex<LineState>,
    idle: Signal,
    worked: Signal,
    events: Arc<Observers<LineEvent>>,
    disposed: AtomicBool,
}

struct LineState {
    busy_slots: Vec<bool>,
    busy_count: usize,
    canceled: bool,
}

impl WorkingLine {
    /// Build a line with `worker_count` slots (clamped into
    /// `1..=MAX_WORKERS`), each with its own worker from `factory`. Threads
    /// are spawned by [`start`](Self::start).
    pub fn new(
        tag: impl Into<String>,
        factory: Arc<dyn WorkerFactory>,
        worker_count: usize,
        priority: ThreadPriority,
        event_loop: Arc<EventLoop>,
    ) -> Self {
        let tag = tag.into();
        let count = worker_count.clamp(1, MAX_WORKERS);
        if count != worker_count {
            debug!(line = %tag, requested = worker_count, used = count, "worker count clamped");
        }

        let inner = Arc::new_cyclic(|weak: &Weak<LineInner>| {
            let queue = Arc::new(BlockingQueue::new());
            let slots = (0..count)
                .map(|index| build_slot(weak, &tag, index, &queue, factory.as_ref()))
                .collect();

            LineInner {
                tag: tag.clone(),
                priority,
                factory: Arc::clone(&factory),
                event_loop,
                queue,
                slots: Mutex::new(slots),
                state: Mutex::new(LineState {
                    busy_slots: vec![false; count],
                    busy_count: 0,
                    canceled: false,
                }),
                idle: Signal::manual(true),
                worked: Signal::manual(false),
                events: Arc::new(Observers::new()),
                disposed: AtomicBool::new(false),
            }
        });

        debug!(line = %tag, workers = count, %priority, "working line created");
        Self { inner }
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    pub fn priority(&self) -> ThreadPriority {
        self.inner.priority
    }

    pub fn worker_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn busy_worker_count(&self) -> usize {
        self.inner.state.lock().busy_count
    }

    pub fn is_busy(&self) -> bool {
        self.busy_worker_count() > 0
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().canceled
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Tasks queued but not picked up yet.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Tasks currently held by a worker slot.
    pub fn current_tasks(&self) -> Vec<Arc<Task>> {
        self.inner
            .slots
            .lock()
            .iter()
            .filter_map(WorkerThread::current_task)
            .collect()
    }

    /// Subscribe to line events. Handlers run on the event loop thread.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LineEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    pub fn enqueue(&self, task: Arc<Task>) {
        debug!(line = %self.inner.tag, task = %task.label(), "task enqueued");
        self.inner.queue.enqueue(task);
    }

    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = Arc<Task>>) {
        for task in tasks {
            self.enqueue(task);
        }
    }

    /// Start every slot. Slots stopped by an earlier cancellation are
    /// replaced by fresh ones; running slots are left alone.
    pub fn start(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(TasklineError::Disposed(format!(
                "working line '{}'",
                self.inner.tag
            )));
        }

        let was_canceled = std::mem::replace(&mut self.inner.state.lock().canceled, false);

        let weak = Arc::downgrade(&self.inner);
        let mut slots = self.inner.slots.lock();
        for index in 0..slots.len() {
            let phase = slots[index].phase();
            if phase == WorkerPhase::Running && !was_canceled {
                continue;
            }
            if phase != WorkerPhase::NotStarted {
                // Canceled slots are stopping; joining the old thread waits
                // for its work unit to return.
                let fresh = build_slot(
                    &weak,
                    &self.inner.tag,
                    index,
                    &self.inner.queue,
                    self.inner.factory.as_ref(),
                );
                let old = std::mem::replace(&mut slots[index], fresh);
                old.dispose();
                self.inner.state.lock().busy_slots[index] = false;
            }
            slots[index].start()?;
        }

        info!(line = %self.inner.tag, workers = slots.len(), priority = %self.inner.priority, "working line started");
        Ok(())
    }

    /// Move every queued task to Obsolete and cancel every slot.
    /// Idempotent; `Canceled` is published once.
    pub fn cancel(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
        }

        let drained = self.inner.queue.drain_all();
        let mut obsoleted = 0usize;
        for task in &drained {
            if task.make_obsolete(None) {
                obsoleted += 1;
            }
        }

        for slot in self.inner.slots.lock().iter() {
            slot.cancel();
        }

        info!(line = %self.inner.tag, drained = drained.len(), obsoleted, "working line canceled");
        self.inner.publish(LineEvent::Canceled);
    }

    /// Wait until the line is idle and its pending notifications were
    /// delivered. With `must_have_worked`, first wait until at least one slot
    /// has ever been busy. Returns `false` on timeout.
    pub fn wait_for_end(&self, must_have_worked: bool, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        if must_have_worked && !self.inner.worked.wait(remaining(deadline)) {
            return false;
        }
        self.inner.idle.wait(remaining(deadline))
            && (self.is_disposed() || self.inner.event_loop.wait_for_empty(remaining(deadline)))
    }

    /// Wait until every slot's thread has exited. Returns `false` on
    /// timeout.
    pub fn wait_for_death(&self, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let slots = self.inner.slots.lock();
        slots
            .iter()
            .all(|slot| slot.wait_for_death(remaining(deadline)))
    }

    /// Dispose the queue (waking every slot), then stop and join the slots.
    /// Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.queue.dispose();
        for slot in self.inner.slots.lock().iter() {
            slot.dispose();
        }

        self.inner.idle.set();
        self.inner.worked.set();
        debug!(line = %self.inner.tag, "working line disposed");
    }
}

impl Drop for WorkingLine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for WorkingLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingLine")
            .field("tag", &self.inner.tag)
            .field("priority", &self.inner.priority)
            .field("workers", &self.worker_count())
            .field("busy_workers", &self.busy_worker_count())
            .finish_non_exhaustive()
    }
}

fn build_slot(
    line: &Weak<LineInner>,
    tag: &str,
    index: usize,
    queue: &Arc<BlockingQueue<Arc<Task>>>,
    factory: &dyn WorkerFactory,
) -> WorkerThread {
    let slot = WorkerThread::new(
        format!("worker-{tag}-{index:04}"),
        Arc::clone(queue),
        factory.create(),
    );

    let line = Weak::clone(line);
    slot.subscribe(move |event| {
        if let Some(line) = line.upgrade() {
            line.on_slot_event(index, event);
        }
    });
    slot
}

impl LineInner {
    fn publish(&self, event: LineEvent) {
        let events = Arc::clone(&self.events);
        self.event_loop.push(move |_| events.emit(&event));
    }

    fn on_slot_event(&self, index: usize, event: &WorkerEvent) {
        match event {
            WorkerEvent::BusyChanged { new, .. } => self.on_slot_busy(index, *new),
            WorkerEvent::TaskBegin(task) => self.publish(LineEvent::TaskBegin(Arc::clone(task))),
            WorkerEvent::TaskEnd(task) => self.publish(LineEvent::TaskEnd(Arc::clone(task))),
            WorkerEvent::TaskRejected { task, state } => self.publish(LineEvent::TaskRejected {
                task: Arc::clone(task),
                state: *state,
            }),
            WorkerEvent::WorkerError { task, error } => self.publish(LineEvent::WorkerError {
                task: Arc::clone(task),
                error: Arc::clone(error),
            }),
            WorkerEvent::AliveChanged(_) | WorkerEvent::Canceled => {}
        }
    }

    /// Recount busy slots. Notifications are pushed while the line lock is
    /// held so that count changes reach the loop in order.
    fn on_slot_busy(&self, index: usize, busy: bool) {
        let mut state = self.state.lock();
        let Some(slot) = state.busy_slots.get_mut(index) else {
            return;
        };
        *slot = busy;

        let old = state.busy_count;
        let new = state.busy_slots.iter().filter(|b| **b).count();
        if old == new {
            return;
        }
        state.busy_count = new;

        if old == 0 && new > 0 {
            // `idle` must be reset before `worked` wakes `wait_for_end`.
            self.idle.reset();
            self.worked.set();
            self.publish(LineEvent::BusyChanged {
                old: false,
                new: true,
            });
            self.publish(LineEvent::BusyWorkerCountChanged { old, new });
        } else if new == 0 {
            self.publish(LineEvent::BusyWorkerCountChanged { old, new });
            self.publish(LineEvent::BusyChanged {
                old: true,
                new: false,
            });
            self.idle.set();
        } else {
            self.publish(LineEvent::BusyWorkerCountChanged { old, new });
        }
    }
}
