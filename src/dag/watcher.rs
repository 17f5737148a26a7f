// src/dag/watcher.rs

//! Tracks the dependencies of one task during one run.
//!
//! A [`DependencyWatcher`] subscribes to every distinct dependency of its
//! task and to the task itself:
//!
//! - a dependency reaching `Succeeded` is dropped from the incomplete set
//!   (and unsubscribed). When the set becomes empty while the task is still
//!   `Waiting`, the watcher turns ready and fires [`WatcherEvent::GotReady`].
//! - a dependency reaching `Failed`, `Canceled` or `Obsolete` detaches the
//!   watcher from every remaining dependency and drives the task to
//!   `Obsolete`. Only a `Failed` dependency attaches a [`DependencyFailed`]
//!   error.
//! - the task itself reaching `Obsolete` by any path detaches the remaining
//!   dependency subscriptions first, then fires [`WatcherEvent::GotObsolete`]
//!   exactly once.
//!
//! Notifications fire synchronously on the thread that caused the change.
//! Dependencies that are already settled when the watcher is built are
//! evaluated right away, since no event will ever fire for them.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::errors::{DependencyFailed, SharedError};
use crate::sync::{Observers, SubscriptionId};

use super::state::TaskState;
use super::task::{Task, TaskEvent, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEvent {
    GotReady,
    GotObsolete,
}

pub struct DependencyWatcher {
    inner: Arc<WatcherInner>,
}

struct WatcherInner {
    task: Arc<Task>,
    state: Mutex<WatchState>,
    events: Observers<WatcherEvent>,
    dispatch_claimed: AtomicBool,
}

#[derive(Default)]
struct WatchState {
    incomplete: Vec<(Arc<Task>, SubscriptionId)>,
    own_subscription: Option<SubscriptionId>,
    ready: bool,
    obsolete: bool,
    detached: bool,
}

impl DependencyWatcher {
    pub fn new(task: Arc<Task>) -> Self {
        let inner = Arc::new(WatcherInner {
            task: Arc::clone(&task),
            state: Mutex::new(WatchState::default()),
            events: Observers::new(),
            dispatch_claimed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let own = task.subscribe(move |event| {
            if let TaskEvent::StateChanged {
                new: TaskState::Obsolete,
                ..
            } = event
            {
                if let Some(inner) = weak.upgrade() {
                    inner.on_own_obsolete();
                }
            }
        });
        inner.state.lock().own_subscription = Some(own);

        let mut seen = HashSet::new();
        for dependency in task.dependencies() {
            if !seen.insert(dependency.id()) {
                continue;
            }
            let id = subscribe_dependency(&inner, dependency);
            inner
                .state
                .lock()
                .incomplete
                .push((Arc::clone(dependency), id));
        }

        // Catch up with states no event will report anymore.
        if task.state() == TaskState::Obsolete {
            inner.on_own_obsolete();
        }
        let pending: Vec<Arc<Task>> = inner
            .state
            .lock()
            .incomplete
            .iter()
            .map(|(dep, _)| Arc::clone(dep))
            .collect();
        for dependency in pending {
            inner.on_dependency_state(dependency.id(), dependency.state());
        }
        inner.check_ready();

        Self { inner }
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.inner.task
    }

    /// All dependencies succeeded while the task was still waiting.
    pub fn is_ready(&self) -> bool {
        self.inner.state.lock().ready
    }

    pub fn is_obsolete(&self) -> bool {
        self.inner.state.lock().obsolete
    }

    /// Dependencies that have not succeeded yet.
    pub fn incomplete_dependencies(&self) -> Vec<Arc<Task>> {
        self.inner
            .state
            .lock()
            .incomplete
            .iter()
            .map(|(dep, _)| Arc::clone(dep))
            .collect()
    }

    /// Returns `true` exactly once, and only for a ready watcher. The caller
    /// that gets `true` owns the dispatch of the task.
    pub fn claim_dispatch(&self) -> bool {
        self.is_ready()
            && self
                .inner
                .dispatch_claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn is_dispatch_claimed(&self) -> bool {
        self.inner.dispatch_claimed.load(Ordering::Acquire)
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&WatcherEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }
}

impl Drop for DependencyWatcher {
    fn drop(&mut self) {
        self.inner.detach();
    }
}

impl fmt::Debug for DependencyWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("DependencyWatcher")
            .field("task", &self.inner.task.label())
            .field("incomplete", &state.incomplete.len())
            .field("ready", &state.ready)
            .field("obsolete", &state.obsolete)
            .finish()
    }
}

fn subscribe_dependency(inner: &Arc<WatcherInner>, dependency: &Arc<Task>) -> SubscriptionId {
    let weak: Weak<WatcherInner> = Arc::downgrade(inner);
    let dependency_id = dependency.id();
    dependency.subscribe(move |event| {
        if let TaskEvent::StateChanged { new, .. } = event {
            if let Some(inner) = weak.upgrade() {
                inner.on_dependency_state(dependency_id, *new);
            }
        }
    })
}

impl WatcherInner {
    fn on_dependency_state(&self, dependency_id: TaskId, state: TaskState) {
        match state {
            TaskState::Succeeded => self.on_dependency_succeeded(dependency_id),
            TaskState::Failed | TaskState::Canceled | TaskState::Obsolete => {
                self.on_dependency_dead(dependency_id, state)
            }
            TaskState::Waiting | TaskState::InProgress | TaskState::CleaningUp => {}
        }
    }

    fn on_dependency_succeeded(&self, dependency_id: TaskId) {
        let removed = {
            let mut state = self.state.lock();
            if state.detached {
                return;
            }
            let position = state
                .incomplete
                .iter()
                .position(|(dep, _)| dep.id() == dependency_id);
            position.map(|index| state.incomplete.remove(index))
        };

        if let Some((dependency, subscription)) = removed {
            dependency.unsubscribe(subscription);
            debug!(
                task = %self.task.label(),
                dependency = %dependency.label(),
                "dependency succeeded"
            );
        }
        self.check_ready();
    }

    fn on_dependency_dead(&self, dependency_id: TaskId, dependency_state: TaskState) {
        let (dependency, remaining) = {
            let mut state = self.state.lock();
            if state.detached || state.obsolete {
                return;
            }
            let dependency = state
                .incomplete
                .iter()
                .find(|(dep, _)| dep.id() == dependency_id)
                .map(|(dep, _)| Arc::clone(dep));
            let Some(dependency) = dependency else {
                return;
            };
            (dependency, std::mem::take(&mut state.incomplete))
        };

        for (dep, subscription) in remaining {
            dep.unsubscribe(subscription);
        }

        let error: Option<SharedError> = if dependency_state == TaskState::Failed {
            Some(Arc::new(DependencyFailed {
                dependency: dependency.label().to_string(),
                cause: dependency.error(),
            }))
        } else {
            None
        };

        debug!(
            task = %self.task.label(),
            dependency = %dependency.label(),
            dependency_state = %dependency_state,
            "dependency will not succeed; task becomes obsolete"
        );

        // A lost race (task already left Waiting) is not a fault.
        self.task.make_obsolete(error);
    }

    fn on_own_obsolete(&self) {
        let remaining = {
            let mut state = self.state.lock();
            if state.detached || state.obsolete {
                return;
            }
            state.obsolete = true;
            std::mem::take(&mut state.incomplete)
        };

        for (dep, subscription) in remaining {
            dep.unsubscribe(subscription);
        }

        debug!(task = %self.task.label(), "task obsolete");
        self.events.emit(&WatcherEvent::GotObsolete);
    }

    fn check_ready(&self) {
        {
            let mut state = self.state.lock();
            if state.detached
                || state.ready
                || state.obsolete
                || !state.incomplete.is_empty()
                || self.task.state() != TaskState::Waiting
            {
                return;
            }
            state.ready = true;
        }

        debug!(task = %self.task.label(), "task ready");
        self.events.emit(&WatcherEvent::GotReady);
    }

    fn detach(&self) {
        let (remaining, own) = {
            let mut state = self.state.lock();
            if state.detached {
                return;
            }
            state.detached = true;
            (
                std::mem::take(&mut state.incomplete),
                state.own_subscription.take(),
            )
        };

        for (dep, subscription) in remaining {
            dep.unsubscribe(subscription);
        }
        if let Some(own) = own {
            self.task.unsubscribe(own);
        }
        self.events.clear();
    }
}
