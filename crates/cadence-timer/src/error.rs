use cadence_core::BusError;
use thiserror::Error;

/// Errors that can occur within the timer engine.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The notification endpoint could not be opened.
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    /// The scheduler thread could not be started.
    #[error("Failed to spawn scheduler thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A periodic timer needs a non-zero interval.
    #[error("Periodic timer requires a non-zero interval")]
    ZeroInterval,

    /// The scheduler thread panicked before it was joined.
    #[error("Scheduler thread panicked")]
    SchedulerPanicked,
}

pub type Result<T> = std::result::Result<T, TimerError>;
