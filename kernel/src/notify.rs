//! Completion wait queue.
//!
//! Interrupts broadcast on the queue without saying which descriptor
//! finished; every waiter re-evaluates its own condition after each wake.
//! The condition is checked with the queue lock held and `notify_all` takes
//! the same lock, so a completion landing between check and sleep is
//! always seen.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Broadcast wait queue keyed by a wake generation.
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        let mut generation = self.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Number of broadcasts so far.
    pub fn generation(&self) -> u64 {
        *self.lock()
    }

    /// Block until `done` returns true or `timeout` elapses.
    ///
    /// # Returns
    ///
    /// The final value of `done`.
    pub fn wait_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, _) = self
                .cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next;
        }
    }
}
