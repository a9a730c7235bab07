use serde::{Deserialize, Serialize};

/// Identity of a timer within one engine; also the tie-break in the index.
pub type TimerId = u64;

/// Whether a timer fires once or re-arms after every expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    /// Fire once, then retire. The payload moves into the notification.
    Once,
    /// Fire every interval. Each notification carries a clone of the payload.
    Periodic,
}

impl Repeat {
    pub fn is_periodic(self) -> bool {
        matches!(self, Repeat::Periodic)
    }
}

impl From<bool> for Repeat {
    fn from(repeat: bool) -> Self {
        if repeat {
            Repeat::Periodic
        } else {
            Repeat::Once
        }
    }
}

/// Ownership state of a timer entry, shared between its handle and the
/// scheduler. Transitions only leave `Active`, and only by compare-and-set,
/// so exactly one party retires each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum TimerState {
    /// Indexed and waiting for its deadline.
    Active = 0,
    /// One-shot entry that fired; the scheduler retired it.
    Fired = 1,
    /// Destroyed by its handle before it fired.
    Cancelled = 2,
}

impl TimerState {
    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            0 => TimerState::Active,
            1 => TimerState::Fired,
            _ => TimerState::Cancelled,
        }
    }
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerState::Active => "active",
            TimerState::Fired => "fired",
            TimerState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Body of a `TIMER_EXPIRE` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired<P> {
    pub timer: TimerId,
    pub repeat: Repeat,
    /// The deadline that fired, in engine-clock milliseconds. For periodic
    /// timers successive notifications differ by exactly the interval.
    pub deadline: u64,
    /// Caller-owned correlation value given to `create`.
    pub payload: P,
}
