// src/sync/mod.rs

//! Low-level synchronization building blocks.
//!
//! - [`observers`] is the explicit observer registry every component uses to
//!   publish notifications.
//! - [`signal`] provides manual/auto-reset events with timeout waits.
//! - [`cancel`] holds the cooperative [`CancellationSignal`].
//! - [`queue`] holds the thread-safe FIFO [`BlockingQueue`].
//! - [`event_loop`] holds the single-consumer [`EventLoop`] that decouples
//!   notification delivery from the threads producing it.

pub mod cancel;
pub mod event_loop;
pub mod observers;
pub mod queue;
pub mod signal;

pub use cancel::CancellationSignal;
pub use event_loop::{EventLoop, LoopContext, UnhandledFailure};
pub use observers::{Observers, SubscriptionId};
pub use queue::{BlockingQueue, QueueEvent};
pub use signal::Signal;

use std::time::{Duration, Instant};

/// Absolute deadline derived from an optional timeout.
///
/// `None` means "wait forever".
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// Time left until `deadline`, saturating at zero.
pub(crate) fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}
