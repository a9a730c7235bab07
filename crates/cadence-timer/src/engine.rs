use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::Duration,
};

use cadence_core::{
    Clock, Endpoint, Event, ListenerId, MessageBus, MonotonicClock, Priority, TimerConfig,
};
use tracing::{debug, error, info, warn};

use crate::{
    entry::{TimerEntry, TimerHandle},
    error::{Result, TimerError},
    index::{ExpiryIndex, ScanOutcome},
    types::{Expired, Repeat, TimerState},
};

/// State shared between the engine's callers and its scheduler thread.
///
/// Field order is drop order: the reverse of creation order in `init`.
struct Shared<P> {
    running: AtomicBool,
    endpoint: Endpoint<Expired<P>>,
    index: Mutex<ExpiryIndex<P>>,
    event: Arc<Event>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
}

impl<P: Clone> Shared<P> {
    fn index(&self) -> MutexGuard<'_, ExpiryIndex<P>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One scheduler cycle: dispatch what is due and return the next wait (ms).
    fn process(&self) -> u64 {
        let report = {
            let mut index = self.index();
            let now = self.clock.now_ms();
            index.scan(now, &self.endpoint)
        };

        match report.outcome {
            ScanOutcome::Empty => self.config.default_wait_ms,
            ScanOutcome::NextDue(ms) => ms,
            ScanOutcome::Backpressure(listener) => {
                let space_now = self
                    .endpoint
                    .notify_on_space(listener, Priority::High, &self.event);
                debug!(
                    %listener,
                    dispatched = report.dispatched,
                    space_now,
                    "listener mailbox full, holding expirations"
                );
                if space_now {
                    self.config.backpressure_wait_ms
                } else {
                    // The mailbox wakes us when it drains; this is only a backstop.
                    self.config.default_wait_ms
                }
            }
        }
    }
}

/// Timer engine: an expiry index, a mutex guarding it, and one scheduler
/// thread that delivers `TIMER_EXPIRE` notifications through a [`MessageBus`].
///
/// `create` and `destroy` may be called from any number of threads through a
/// shared reference. [`shutdown`](Self::shutdown) consumes the engine; dropping
/// it has the same effect.
pub struct TimerEngine<P: Clone + Send + 'static> {
    shared: Arc<Shared<P>>,
    scheduler: Option<JoinHandle<()>>,
}

impl<P: Clone + Send + 'static> TimerEngine<P> {
    /// Start an engine on the monotonic clock.
    pub fn init(bus: &MessageBus<Expired<P>>, config: &TimerConfig) -> Result<Self> {
        Self::init_with_clock(bus, config, Arc::new(MonotonicClock::new()))
    }

    /// Start an engine reading deadlines from `clock`.
    ///
    /// On failure every resource created so far is released before the error
    /// is returned.
    pub fn init_with_clock(
        bus: &MessageBus<Expired<P>>,
        config: &TimerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let event = Arc::new(Event::new());
        let index = Mutex::new(ExpiryIndex::new());
        let endpoint = bus.endpoint(&config.thread_name)?;

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            endpoint,
            index,
            event,
            clock,
            config: config.clone(),
        });

        let worker = Arc::clone(&shared);
        let scheduler = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_scheduler(worker))
            .map_err(|e| {
                error!(
                    thread = %config.thread_name,
                    error = %e,
                    "failed to spawn timer scheduler"
                );
                TimerError::Spawn(e)
            })?;

        info!(
            thread = %config.thread_name,
            endpoint = %shared.endpoint.id(),
            default_wait_ms = config.default_wait_ms,
            "timer engine started"
        );

        Ok(Self {
            shared,
            scheduler: Some(scheduler),
        })
    }

    /// Schedule `payload` to be delivered to `listener` after `timeout`.
    ///
    /// Periodic timers re-arm every `timeout` from their previous deadline.
    /// The timeout is truncated to whole milliseconds.
    pub fn create(
        &self,
        listener: ListenerId,
        repeat: Repeat,
        timeout: Duration,
        payload: P,
    ) -> Result<TimerHandle> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if repeat.is_periodic() && timeout_ms == 0 {
            return Err(TimerError::ZeroInterval);
        }

        let entry = TimerEntry::new(
            listener,
            repeat,
            self.shared.clock.now_ms(),
            timeout_ms,
            payload,
        );
        let state = Arc::clone(&entry.state);
        let id = self.shared.index().insert(entry);

        // The new entry may be the earliest one; the scheduler must recompute.
        self.shared.event.wakeup();

        debug!(timer_id = id, %listener, ?repeat, timeout_ms, "timer created");
        Ok(TimerHandle::new(id, repeat, state))
    }

    /// Cancel a timer.
    ///
    /// Returns the payload if the timer was still scheduled. Returns `None`
    /// when a one-shot timer already fired: its payload travelled with the
    /// notification.
    pub fn destroy(&self, handle: TimerHandle) -> Option<P> {
        let payload = self
            .shared
            .index()
            .cancel_owned(handle.id(), &handle)
            .map(|entry| entry.payload);
        if payload.is_none() && handle.state() == TimerState::Active {
            warn!(timer_id = handle.id(), "handle does not belong to this engine");
        }

        self.shared.event.wakeup();

        debug!(
            timer_id = handle.id(),
            cancelled = payload.is_some(),
            "timer destroyed"
        );
        payload
    }

    /// Repeat kind of `handle`. Lock-free.
    pub fn repeat(&self, handle: &TimerHandle) -> Repeat {
        handle.repeat()
    }

    /// Stop the scheduler thread and release the engine.
    ///
    /// Timers that were never destroyed are dropped with the engine and
    /// reported in the log.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(scheduler) = self.scheduler.take() else {
            return Ok(());
        };

        self.shared.running.store(false, Ordering::Release);
        self.shared.event.wakeup();
        let joined = scheduler.join();

        let outstanding = self.shared.index().len();
        if outstanding > 0 {
            warn!(outstanding, "timer engine stopped with timers still scheduled");
        }

        match joined {
            Ok(()) => {
                info!("timer engine stopped");
                Ok(())
            }
            Err(_) => {
                error!("timer scheduler thread panicked");
                Err(TimerError::SchedulerPanicked)
            }
        }
    }
}

impl<P: Clone + Send + 'static> Drop for TimerEngine<P> {
    fn drop(&mut self) {
        // Errors are already logged by `stop`.
        let _ = self.stop();
    }
}

fn run_scheduler<P: Clone + Send + 'static>(shared: Arc<Shared<P>>) {
    debug!("timer scheduler running");
    let mut wait_ms = shared.config.default_wait_ms;

    loop {
        shared.event.wait(Duration::from_millis(wait_ms));
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        wait_ms = shared.process();
    }

    debug!("timer scheduler exiting");
}
