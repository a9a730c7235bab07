//! Per-timer state and the caller-side handle.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use cadence_core::ListenerId;

use crate::types::{Repeat, TimerId, TimerState};

/// One scheduled timer, owned by the engine's arena.
#[derive(Debug)]
pub(crate) struct TimerEntry<P> {
    pub listener: ListenerId,
    /// Re-arm amount in milliseconds; only used by periodic entries.
    pub interval: u64,
    /// Absolute deadline on the engine clock.
    pub deadline: u64,
    pub repeat: Repeat,
    pub state: Arc<AtomicU8>,
    pub payload: P,
}

impl<P> TimerEntry<P> {
    pub fn new(listener: ListenerId, repeat: Repeat, now: u64, timeout: u64, payload: P) -> Self {
        Self {
            listener,
            interval: timeout,
            deadline: now.saturating_add(timeout),
            repeat,
            state: Arc::new(AtomicU8::new(TimerState::Active as u8)),
            payload,
        }
    }

    pub fn state(&self) -> TimerState {
        TimerState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Claim a one-shot entry for delivery. Fails if a destroy got there first.
    pub fn try_fire(&self) -> bool {
        transition(&self.state, TimerState::Fired)
    }

    /// Advance a periodic deadline by one interval.
    pub fn rearm(&mut self) -> u64 {
        self.deadline = self.deadline.saturating_add(self.interval);
        self.deadline
    }
}

/// Caller-side reference to a timer created by
/// [`TimerEngine::create`](crate::TimerEngine::create).
///
/// Not `Clone`: handing it to [`TimerEngine::destroy`](crate::TimerEngine::destroy)
/// consumes it, so a timer cannot be destroyed twice.
#[derive(Debug)]
#[must_use = "dropping a TimerHandle leaves the timer scheduled until engine shutdown"]
pub struct TimerHandle {
    id: TimerId,
    repeat: Repeat,
    state: Arc<AtomicU8>,
}

impl TimerHandle {
    pub(crate) fn new(id: TimerId, repeat: Repeat, state: Arc<AtomicU8>) -> Self {
        Self { id, repeat, state }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    /// The immutable repeat kind given at creation. Lock-free.
    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub(crate) fn state(&self) -> TimerState {
        TimerState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Claim the entry for cancellation. Fails if it already fired.
    pub(crate) fn try_cancel(&self) -> bool {
        transition(&self.state, TimerState::Cancelled)
    }

    /// Whether `entry` is the timer this handle was issued for.
    pub(crate) fn owns<P>(&self, entry: &TimerEntry<P>) -> bool {
        Arc::ptr_eq(&self.state, &entry.state)
    }
}

fn transition(state: &AtomicU8, to: TimerState) -> bool {
    state
        .compare_exchange(
            TimerState::Active as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
}
