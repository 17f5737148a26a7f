// src/sync/signal.rs

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{deadline_after, remaining};

/// A set/reset event with timeout waits.
///
/// - manual-reset: stays set until [`Signal::reset`]; wakes every waiter.
/// - auto-reset: a successful wait consumes the signal; a `set` with no
///   waiter is remembered until the next wait.
#[derive(Debug)]
pub struct Signal {
    state: Mutex<bool>,
    cond: Condvar,
    auto_reset: bool,
}

impl Signal {
    pub fn manual(initially_set: bool) -> Self {
        Self {
            state: Mutex::new(initially_set),
            cond: Condvar::new(),
            auto_reset: false,
        }
    }

    pub fn auto(initially_set: bool) -> Self {
        Self {
            state: Mutex::new(initially_set),
            cond: Condvar::new(),
            auto_reset: true,
        }
    }

    pub fn set(&self) {
        let mut set = self.state.lock();
        *set = true;
        if self.auto_reset {
            self.cond.notify_one();
        } else {
            self.cond.notify_all();
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock()
    }

    /// Wait until the signal is set. Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = deadline_after(timeout);
        let mut set = self.state.lock();

        while !*set {
            match remaining(deadline) {
                None => self.cond.wait(&mut set),
                Some(left) => {
                    if left.is_zero() {
                        return false;
                    }
                    self.cond.wait_for(&mut set, left);
                }
            }
        }

        if self.auto_reset {
            *set = false;
        }
        true
    }
}
