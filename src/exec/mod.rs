// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`worker`] defines the pluggable [`Worker`] contract and its factory.
//! - [`worker_thread`] runs one worker slot on a dedicated OS thread.
//! - [`command`] provides [`CommandWorker`], which runs shell commands and
//!   reports their progress.

pub mod command;
pub mod worker;
pub mod worker_thread;

pub use command::{CommandSpec, CommandWorker};
pub use worker::{FnFactory, FnWorker, Worker, WorkerFactory, factory_fn, worker_fn};
pub use worker_thread::{WorkerEvent, WorkerPhase, WorkerThread};
