// src/exec/worker.rs

//! Pluggable work-unit abstraction.
//!
//! A [`WorkerThread`](super::WorkerThread) does not know what a task means;
//! it hands each task to a [`Worker`]. Production code uses
//! [`CommandWorker`](super::CommandWorker); tests provide their own
//! implementation that, for example, sleeps, records, or fails on demand.
//!
//! A [`WorkerFactory`] produces one fresh worker per worker slot, so a
//! worker instance is never shared between threads.

use std::fmt;
use std::sync::Arc;

use crate::dag::Task;
use crate::sync::CancellationSignal;

/// The work unit executed for each task.
pub trait Worker: Send {
    /// Perform `task`.
    ///
    /// - return `Ok(())` on success; the task ends `Succeeded` (or
    ///   `Canceled` if `cancel` fired meanwhile);
    /// - return `Err` on failure; the task ends `Failed` with the error.
    ///
    /// The worker may report progress with [`Task::update_progress`] and may
    /// move the task to `CleaningUp` (or any later state) itself. It must
    /// poll `cancel` to stop promptly; nothing interrupts it.
    fn process(&mut self, task: &Arc<Task>, cancel: &CancellationSignal) -> anyhow::Result<()>;
}

/// Creates one [`Worker`] per worker slot.
pub trait WorkerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Worker>;
}

/// Worker built from a closure. See [`worker_fn`].
pub struct FnWorker<F>(F);

impl<F> Worker for FnWorker<F>
where
    F: FnMut(&Arc<Task>, &CancellationSignal) -> anyhow::Result<()> + Send,
{
    fn process(&mut self, task: &Arc<Task>, cancel: &CancellationSignal) -> anyhow::Result<()> {
        (self.0)(task, cancel)
    }
}

impl<F> fmt::Debug for FnWorker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnWorker")
    }
}

/// Wrap a closure as a [`Worker`].
pub fn worker_fn<F>(f: F) -> FnWorker<F>
where
    F: FnMut(&Arc<Task>, &CancellationSignal) -> anyhow::Result<()> + Send,
{
    FnWorker(f)
}

/// Factory built from a closure. See [`factory_fn`].
pub struct FnFactory<F>(F);

impl<F> WorkerFactory for FnFactory<F>
where
    F: Fn() -> Box<dyn Worker> + Send + Sync,
{
    fn create(&self) -> Box<dyn Worker> {
        (self.0)()
    }
}

impl<F> fmt::Debug for FnFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnFactory")
    }
}

/// Wrap a closure producing workers as a [`WorkerFactory`].
pub fn factory_fn<F>(f: F) -> FnFactory<F>
where
    F: Fn() -> Box<dyn Worker> + Send + Sync,
{
    FnFactory(f)
}
