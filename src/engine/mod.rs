// src/engine/mod.rs

//! Orchestration engine for taskline.
//!
//! This module ties together:
//! - working lines: named pools of worker threads sharing one task queue
//! - the task manager: registers tasks and lines, tracks dependencies,
//!   dispatches ready tasks, detects the end of a run, handles cancellation
//!
//! Both publish their notifications through an [`EventLoop`], so observers
//! never run on worker threads and see one total order per manager.
//!
//! [`EventLoop`]: crate::sync::EventLoop

use std::sync::Arc;

use crate::dag::{Task, TaskState};
use crate::errors::SharedError;

/// Upper bound on the number of worker threads of one working line.
pub const MAX_WORKERS: usize = 1024;

/// Notifications published by a [`WorkingLine`] on its event loop.
#[derive(Debug, Clone)]
pub enum LineEvent {
    BusyWorkerCountChanged { old: usize, new: usize },
    BusyChanged { old: bool, new: bool },
    TaskBegin(Arc<Task>),
    TaskEnd(Arc<Task>),
    TaskRejected { task: Arc<Task>, state: TaskState },
    WorkerError { task: Arc<Task>, error: SharedError },
    Canceled,
}

/// Notifications published by a [`TaskManager`].
///
/// Every variant except `Disposed` is delivered on the manager's event loop.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Started,
    RunningChanged(bool),
    BusyWorkingLinesChanged {
        old: usize,
        new: usize,
    },
    TaskBegin {
        line: String,
        task: Arc<Task>,
    },
    TaskEnd {
        line: String,
        task: Arc<Task>,
    },
    TaskRejected {
        line: String,
        task: Arc<Task>,
        state: TaskState,
    },
    WorkerError {
        line: String,
        task: Arc<Task>,
        error: SharedError,
    },
    Canceled,
    Finished,
    /// A closure on the manager's event loop (typically an observer)
    /// panicked or failed.
    UnhandledFailure {
        message: String,
    },
    Disposed,
}

pub mod manager;
pub mod working_line;

pub use crate::types::ThreadPriority;
pub use manager::TaskManager;
pub use working_line::WorkingLine;
