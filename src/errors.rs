// src/errors.rs

//! Crate-wide error types.
//!
//! [`TasklineError`] covers usage faults (invalid transitions, mutating a
//! running manager, ...) and configuration problems. These surface
//! synchronously to the caller that misused the API.
//!
//! Failures of the pluggable work unit are plain `anyhow::Error`s; once they
//! are attached to a task they are stored as a [`SharedError`] so the same
//! error value can be handed to every observer.

use std::sync::Arc;

use thiserror::Error;

use crate::dag::TaskState;

/// Error value attached to a task (`Task::error`).
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TasklineError {
    #[error("Invalid task state transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("Task '{label}' is not waiting (state {state})")]
    TaskNotWaiting { label: String, state: TaskState },

    #[error("Task '{label}' has the queue tag '{tag}', but no working line exists for it")]
    MissingWorkingLine { label: String, tag: String },

    #[error("The queue tag '{0}' is already used by another working line")]
    DuplicateQueueTag(String),

    #[error("The task manager is already running")]
    AlreadyRunning,

    #[error("{0} can not be changed while the task manager is running")]
    ConfigurationLocked(&'static str),

    #[error("{0} has been disposed")]
    Disposed(String),

    #[error("{0} was already started")]
    AlreadyStarted(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TasklineError>;

/// Attached to a task that became obsolete because one of its dependencies
/// failed. `cause` is the dependency's own error, if it had one.
#[derive(Error, Debug)]
#[error("A dependency of the task failed: '{dependency}'")]
pub struct DependencyFailed {
    pub dependency: String,
    #[source]
    pub cause: Option<SharedError>,
}

/// A command task exited unsuccessfully. `code` is -1 when the process was
/// terminated by a signal.
#[derive(Error, Debug)]
#[error("command of task '{task}' failed with exit code {code}")]
pub struct CommandFailed {
    pub task: String,
    pub code: i32,
}

/// A work unit panicked instead of returning an error.
#[derive(Error, Debug)]
#[error("worker panicked: {0}")]
pub struct WorkerPanic(pub String);

/// Convert a work-unit error into the shared form stored on tasks.
pub fn share_error(err: anyhow::Error) -> SharedError {
    let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
    Arc::from(boxed)
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
