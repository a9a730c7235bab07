//! Expiry-ordered timer storage and the per-cycle scan.
//!
//! Entries live in an arena keyed by [`TimerId`]; a separate ordered set of
//! `(deadline, id)` keys drives expiry order. The id tie-break makes dispatch
//! order among equal deadlines deterministic (creation order).

use std::collections::{BTreeMap, BTreeSet};

use cadence_core::{DispatchError, Endpoint, ListenerId, MessageKind, Priority};
use tracing::{trace, warn};

use crate::{
    entry::{TimerEntry, TimerHandle},
    types::{Expired, Repeat, TimerId, TimerState},
};

/// What the scheduler should do after a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanOutcome {
    /// Nothing is scheduled.
    Empty,
    /// The earliest remaining deadline is this many milliseconds away.
    NextDue(u64),
    /// The head entry is due but its listener's lane is full.
    Backpressure(ListenerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScanReport {
    pub outcome: ScanOutcome,
    pub dispatched: usize,
}

pub(crate) struct ExpiryIndex<P> {
    keys: BTreeSet<(u64, TimerId)>,
    entries: BTreeMap<TimerId, TimerEntry<P>>,
    next_id: TimerId,
}

impl<P: Clone> ExpiryIndex<P> {
    pub fn new() -> Self {
        Self {
            keys: BTreeSet::new(),
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, entry: TimerEntry<P>) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.keys.insert((entry.deadline, id));
        self.entries.insert(id, entry);
        id
    }

    /// Take an entry out of both the arena and the ordering.
    pub fn remove(&mut self, id: TimerId) -> Option<TimerEntry<P>> {
        let entry = self.entries.remove(&id)?;
        self.keys.remove(&(entry.deadline, id));
        Some(entry)
    }

    /// Cancel and take the entry stored under `id`, but only if `handle` was
    /// issued for it. A handle for any other entry changes nothing.
    pub fn cancel_owned(&mut self, id: TimerId, handle: &TimerHandle) -> Option<TimerEntry<P>> {
        if !self.entries.get(&id).is_some_and(|e| handle.owns(e)) {
            return None;
        }
        if !handle.try_cancel() {
            return None;
        }
        self.remove(id)
    }

    /// Number of entries still owned by the arena.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch every entry due at `now`, earliest first.
    ///
    /// Stops at the first entry that is not yet due, or at the first entry
    /// whose listener lane is full. In the latter case that entry is left
    /// untouched at the head of the index.
    pub fn scan(&mut self, now: u64, endpoint: &Endpoint<Expired<P>>) -> ScanReport {
        let mut dispatched = 0;

        let outcome = loop {
            let Some(&(deadline, id)) = self.keys.first() else {
                break ScanOutcome::Empty;
            };
            if deadline > now {
                break ScanOutcome::NextDue(deadline - now);
            }

            let (listener, repeat, state) = match self.entries.get(&id) {
                Some(entry) => (entry.listener, entry.repeat, entry.state()),
                None => {
                    self.keys.remove(&(deadline, id));
                    continue;
                }
            };
            if state == TimerState::Cancelled {
                // The destroying caller owns the entry now; only unlink it.
                self.keys.remove(&(deadline, id));
                continue;
            }

            let reservation = match endpoint.try_reserve(listener, Priority::High) {
                Ok(reservation) => Some(reservation),
                Err(DispatchError::Full { .. }) => break ScanOutcome::Backpressure(listener),
                Err(e) => {
                    warn!(
                        timer_id = id,
                        %listener,
                        error = %e,
                        "expiration undeliverable, dropping notification"
                    );
                    None
                }
            };

            self.keys.remove(&(deadline, id));
            let payload = match repeat {
                Repeat::Once => {
                    let claimed = self.entries.get(&id).is_some_and(|e| e.try_fire());
                    if !claimed {
                        continue;
                    }
                    match self.entries.remove(&id) {
                        Some(entry) => entry.payload,
                        None => continue,
                    }
                }
                Repeat::Periodic => {
                    let Some(entry) = self.entries.get_mut(&id) else {
                        continue;
                    };
                    let next = entry.rearm();
                    self.keys.insert((next, id));
                    entry.payload.clone()
                }
            };

            if let Some(reservation) = reservation {
                reservation.send(
                    MessageKind::TIMER_EXPIRE,
                    Expired {
                        timer: id,
                        repeat,
                        deadline,
                        payload,
                    },
                );
                trace!(timer_id = id, %listener, deadline, now, "timer expired");
                dispatched += 1;
            }
        };

        ScanReport {
            outcome,
            dispatched,
        }
    }
}
