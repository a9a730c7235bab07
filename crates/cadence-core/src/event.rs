//! Cross-thread wakeup primitive.
//!
//! An [`Event`] is a sticky flag guarded by a mutex and paired with a
//! condition variable. `wakeup` sets the flag before notifying, so a wakeup
//! that lands while the waiter is between two `wait` calls is not lost: the
//! next `wait` observes the flag and returns immediately.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Why [`Event::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// `wakeup` was called since the previous wait.
    Signalled,
    /// The timeout elapsed without a wakeup.
    TimedOut,
}

#[derive(Debug, Default)]
pub struct Event {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block for at most `timeout`, consuming a pending wakeup if there is one.
    pub fn wait(&self, timeout: Duration) -> WaitStatus {
        let deadline = Instant::now() + timeout;
        let mut signalled = self
            .signalled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Loop to absorb spurious condvar wakeups.
        while !*signalled {
            let now = Instant::now();
            if now >= deadline {
                return WaitStatus::TimedOut;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(signalled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            signalled = guard;
        }

        *signalled = false;
        WaitStatus::Signalled
    }

    /// Wake the waiter. Callable from any thread; coalesces with other
    /// wakeups that have not been consumed yet.
    pub fn wakeup(&self) {
        let mut signalled = self
            .signalled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *signalled = true;
        self.cond.notify_one();
    }
}
