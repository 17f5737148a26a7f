// src/dag/task.rs

//! The schedulable [`Task`] and its change notifications.
//!
//! A task is shared as `Arc<Task>` between the manager, the dependency
//! watchers of its dependents and the worker thread executing it. All
//! mutation goes through [`Task::update_state`] (and its variants) or
//! [`Task::update_progress`]:
//!
//! - the state change is validated against the transition table;
//! - error, error message and state are assigned in that order;
//! - a [`TaskEvent`] fires for every property that changed, in the same
//!   order, on the calling thread.
//!
//! A per-task reentrant lock is held from validation until the last
//! notification has been delivered, so the notifications of one task are
//! totally ordered. Handlers may update the same task again (the lock is
//! reentrant); they must not assume the task is unchanged by the time they
//! run.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::errors::{Result, SharedError, TasklineError};
use crate::sync::{Observers, SubscriptionId};

use super::state::TaskState;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Property change notification of a single task.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    StateChanged {
        old: TaskState,
        new: TaskState,
    },
    ProgressChanged {
        old: f32,
        new: f32,
    },
    ProgressMessageChanged {
        old: Option<String>,
        new: Option<String>,
    },
    /// The attached error value was replaced (read it with [`Task::error`]).
    ErrorChanged,
    ErrorMessageChanged {
        old: Option<String>,
        new: Option<String>,
    },
}

/// Mutable part of a task, guarded by `Task::status`.
#[derive(Debug)]
struct TaskStatus {
    state: TaskState,
    progress: f32,
    progress_message: Option<String>,
    error: Option<SharedError>,
    error_message: Option<String>,
    progress_reported: bool,
    message_reported: bool,
}

/// Snapshot of a task's mutable properties.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub progress: f32,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
}

pub struct Task {
    id: TaskId,
    label: String,
    queue_tag: String,
    dependencies: Vec<Arc<Task>>,
    payload: Option<Box<dyn Any + Send + Sync>>,
    transition: ReentrantMutex<()>,
    status: Mutex<TaskStatus>,
    observers: Observers<TaskEvent>,
}

impl Task {
    /// Start building a task bound to the working line `queue_tag`.
    pub fn builder(label: impl Into<String>, queue_tag: impl Into<String>) -> TaskBuilder {
        TaskBuilder {
            label: label.into(),
            queue_tag: queue_tag.into(),
            dependencies: Vec::new(),
            payload: None,
        }
    }

    /// A task without dependencies or payload.
    pub fn new(label: impl Into<String>, queue_tag: impl Into<String>) -> Arc<Task> {
        Self::builder(label, queue_tag).build()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn queue_tag(&self) -> &str {
        &self.queue_tag
    }

    /// Dependencies, fixed when the task was built.
    pub fn dependencies(&self) -> &[Arc<Task>] {
        &self.dependencies
    }

    /// Caller data attached at build time, if it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    pub fn state(&self) -> TaskState {
        self.status.lock().state
    }

    pub fn progress(&self) -> f32 {
        self.status.lock().progress
    }

    pub fn progress_message(&self) -> Option<String> {
        self.status.lock().progress_message.clone()
    }

    pub fn error(&self) -> Option<SharedError> {
        self.status.lock().error.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.status.lock().error_message.clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let status = self.status.lock();
        TaskSnapshot {
            state: status.state,
            progress: status.progress,
            progress_message: status.progress_message.clone(),
            error_message: status.error_message.clone(),
        }
    }

    /// Subscribe to property changes. Handlers run synchronously on the
    /// thread that changed the task.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Transition to `new`, clearing any error.
    pub fn update_state(&self, new: TaskState) -> Result<()> {
        self.apply_state(new, None, None)
    }

    /// Transition to `new` with `error` attached; the error message is the
    /// error's `Display` text.
    pub fn update_state_with_error(&self, new: TaskState, error: SharedError) -> Result<()> {
        let message = error.to_string();
        self.apply_state(new, Some(error), Some(message))
    }

    /// Transition to `new` with an error message but no error value.
    pub fn update_state_with_message(
        &self,
        new: TaskState,
        message: impl Into<String>,
    ) -> Result<()> {
        self.apply_state(new, None, Some(message.into()))
    }

    /// Report progress. `value` is clamped into `[0, 1]`; NaN counts as 0.
    pub fn update_progress(&self, message: impl Into<String>, value: f32) {
        let message = Some(message.into());
        let value = clamp_progress(value);

        let _guard = self.transition.lock();
        let mut events = Vec::with_capacity(2);
        {
            let mut status = self.status.lock();

            let old = status.progress;
            if !status.progress_reported || (old - value).abs() > f32::EPSILON {
                status.progress = value;
                status.progress_reported = true;
                events.push(TaskEvent::ProgressChanged { old, new: value });
            }

            if !status.message_reported || status.progress_message != message {
                let old = std::mem::replace(&mut status.progress_message, message.clone());
                status.message_reported = true;
                events.push(TaskEvent::ProgressMessageChanged { old, new: message });
            }
        }

        for event in &events {
            self.observers.emit(event);
        }
    }

    /// Move a task that never started to Obsolete.
    ///
    /// Returns `false` (and changes nothing) if the task already left
    /// Waiting, which happens when a worker or another watcher won the race.
    pub(crate) fn make_obsolete(&self, error: Option<SharedError>) -> bool {
        let _guard = self.transition.lock();
        if self.state() != TaskState::Waiting {
            return false;
        }
        let applied = match error {
            Some(error) => self.update_state_with_error(TaskState::Obsolete, error),
            None => self.update_state(TaskState::Obsolete),
        };
        applied.is_ok()
    }

    fn apply_state(
        &self,
        new: TaskState,
        error: Option<SharedError>,
        error_message: Option<String>,
    ) -> Result<()> {
        let _guard = self.transition.lock();

        let (old, events) = {
            let mut status = self.status.lock();
            let old = status.state;
            if !old.can_transition_to(new) {
                return Err(TasklineError::InvalidTransition { from: old, to: new });
            }

            let mut events = Vec::with_capacity(3);

            if !same_error(&status.error, &error) {
                status.error = error;
                events.push(TaskEvent::ErrorChanged);
            }

            if status.error_message != error_message {
                let old_message =
                    std::mem::replace(&mut status.error_message, error_message.clone());
                events.push(TaskEvent::ErrorMessageChanged {
                    old: old_message,
                    new: error_message,
                });
            }

            status.state = new;
            events.push(TaskEvent::StateChanged { old, new });
            (old, events)
        };

        debug!(task = %self.label, from = %old, to = %new, "task state changed");

        for event in &events {
            self.observers.emit(event);
        }
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("queue_tag", &self.queue_tag)
            .field("dependencies", &self.dependencies.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`Task::builder`].
pub struct TaskBuilder {
    label: String,
    queue_tag: String,
    dependencies: Vec<Arc<Task>>,
    payload: Option<Box<dyn Any + Send + Sync>>,
}

impl TaskBuilder {
    /// Run only after `dependency` succeeded.
    pub fn after(mut self, dependency: &Arc<Task>) -> Self {
        self.dependencies.push(Arc::clone(dependency));
        self
    }

    pub fn after_all<'a>(mut self, dependencies: impl IntoIterator<Item = &'a Arc<Task>>) -> Self {
        self.dependencies
            .extend(dependencies.into_iter().map(Arc::clone));
        self
    }

    pub fn payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    pub fn build(self) -> Arc<Task> {
        Arc::new(Task {
            id: TaskId::next(),
            label: self.label,
            queue_tag: self.queue_tag,
            dependencies: self.dependencies,
            payload: self.payload,
            transition: ReentrantMutex::new(()),
            status: Mutex::new(TaskStatus {
                state: TaskState::Waiting,
                progress: 0.0,
                progress_message: None,
                error: None,
                error_message: None,
                progress_reported: false,
                message_reported: false,
            }),
            observers: Observers::new(),
        })
    }
}

/// Clamp a progress report into `[0, 1]`.
pub fn clamp_progress(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn same_error(a: &Option<SharedError>, b: &Option<SharedError>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}
