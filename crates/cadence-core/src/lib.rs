//! `cadence-core` — primitives shared by the timer engine and its hosts:
//! configuration, the monotonic clock, the cross-thread [`event::Event`],
//! and the addressed [`bus::MessageBus`] that carries notifications.

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use bus::{BusError, DispatchError, Endpoint, Mailbox, MessageBus, Rejected, Reservation};
pub use clock::{Clock, MonotonicClock};
pub use config::{BusConfig, CadenceConfig, TimerConfig};
pub use error::{CadenceError, Result};
pub use event::{Event, WaitStatus};
pub use types::{EndpointId, Envelope, ListenerId, MessageKind, Priority};
