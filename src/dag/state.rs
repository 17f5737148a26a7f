// src/dag/state.rs

//! Task lifecycle states and the transition table.

use std::fmt;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Not started yet.
    Waiting,
    /// Will never run: a dependency failed or was canceled, or the run was
    /// canceled before the task started.
    Obsolete,
    /// Picked up by a worker and being processed.
    InProgress,
    /// Canceled or failed, but the worker is still cleaning up.
    CleaningUp,
    /// Canceled; the worker has stopped processing it.
    Canceled,
    /// Failed; the worker has stopped processing it.
    Failed,
    /// Finished successfully.
    Succeeded,
}

impl TaskState {
    pub const ALL: [TaskState; 7] = [
        TaskState::Waiting,
        TaskState::Obsolete,
        TaskState::InProgress,
        TaskState::CleaningUp,
        TaskState::Canceled,
        TaskState::Failed,
        TaskState::Succeeded,
    ];

    /// Whether `self -> next` is a permitted edge.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        match self {
            Waiting => matches!(next, InProgress | Obsolete),
            InProgress => matches!(next, CleaningUp | Succeeded | Canceled | Failed),
            CleaningUp => matches!(next, Succeeded | Canceled | Failed),
            Succeeded | Failed | Canceled | Obsolete => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Canceled | TaskState::Obsolete
        )
    }

    /// A worker currently owns the task.
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::InProgress | TaskState::CleaningUp)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Waiting => "Waiting",
            TaskState::Obsolete => "Obsolete",
            TaskState::InProgress => "InProgress",
            TaskState::CleaningUp => "CleaningUp",
            TaskState::Canceled => "Canceled",
            TaskState::Failed => "Failed",
            TaskState::Succeeded => "Succeeded",
        };
        f.write_str(name)
    }
}
