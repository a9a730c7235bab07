//! `cadence-timer` — one-shot and periodic timers delivered as bus messages.
//!
//! # Overview
//!
//! A [`TimerEngine`] keeps its timers in an expiry-ordered index guarded by a
//! mutex and runs one dedicated scheduler thread. Callers `create` and
//! `destroy` timers from any thread; the scheduler alone reads the clock,
//! sends a [`MessageKind::TIMER_EXPIRE`](cadence_core::MessageKind::TIMER_EXPIRE)
//! envelope carrying an [`Expired`] body to each due timer's listener, and
//! recomputes how long to sleep.
//!
//! # Timer kinds
//!
//! | Kind       | After firing                                              |
//! |------------|-----------------------------------------------------------|
//! | `Once`     | Retired; the payload moves into the notification          |
//! | `Periodic` | Re-armed at `deadline + interval`; late ticks catch up     |
//!
//! When a listener's mailbox is full the scheduler stops at that timer and
//! resumes as soon as the mailbox drains, so no notification is dropped and
//! expiry order is preserved.

pub mod engine;
pub mod entry;
pub mod error;
mod index;
pub mod types;

pub use engine::TimerEngine;
pub use entry::TimerHandle;
pub use error::{Result, TimerError};
pub use types::{Expired, Repeat, TimerId};
