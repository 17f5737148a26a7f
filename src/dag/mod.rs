// src/dag/mod.rs

//! Tasks and their dependencies.
//!
//! - [`state`] holds the task lifecycle and its transition table.
//! - [`task`] holds the shared, observable [`Task`].
//! - [`watcher`] tracks the dependencies of one task during a run.
//! - [`graph`] is a read-only adjacency view used for planning output.

pub mod graph;
pub mod state;
pub mod task;
pub mod watcher;

pub use graph::TaskGraph;
pub use state::TaskState;
pub use task::{Task, TaskBuilder, TaskEvent, TaskId, TaskSnapshot, clamp_progress};
pub use watcher::{DependencyWatcher, WatcherEvent};
