//! In-process addressed message bus.
//!
//! Every listener owns a [`Mailbox`] made of two bounded lanes (high and
//! normal priority). Producers hold an [`Endpoint`] and address messages by
//! [`ListenerId`]. Sends never block: a full lane is reported back to the
//! caller together with the rejected body, and a producer can ask to be woken
//! through an [`Event`] once the mailbox drains.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError, Weak,
};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError, OwnedPermit};
use tracing::{debug, info};

use crate::{
    config::BusConfig,
    event::Event,
    types::{EndpointId, Envelope, ListenerId, MessageKind, Priority},
};

/// Errors from bus-level operations (registration, opening endpoints).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("Message bus is closed")]
    Closed,
}

/// Why a message could not be handed to a mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The destination lane has no free capacity right now.
    #[error("Mailbox full: {id}")]
    Full { id: ListenerId },

    /// Nothing is registered under the destination id (never was, or dropped).
    #[error("Unknown listener: {id}")]
    UnknownListener { id: ListenerId },

    #[error("Message bus is closed")]
    Closed,
}

impl DispatchError {
    /// `true` for failures that may succeed later without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Full { .. })
    }
}

/// A send that was refused; the body is handed back untouched.
#[derive(Debug)]
pub struct Rejected<M> {
    pub reason: DispatchError,
    pub body: M,
}

/// Events waiting for a mailbox to free capacity.
#[derive(Debug, Default)]
struct SpaceSignal {
    waiters: Mutex<Vec<Arc<Event>>>,
}

impl SpaceSignal {
    fn register(&self, event: &Arc<Event>) {
        let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        if !waiters.iter().any(|w| Arc::ptr_eq(w, event)) {
            waiters.push(Arc::clone(event));
        }
    }

    fn notify(&self) {
        let drained = {
            let mut waiters = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *waiters)
        };
        for event in drained {
            event.wakeup();
        }
    }
}

struct Route<M> {
    high: mpsc::Sender<Envelope<M>>,
    normal: mpsc::Sender<Envelope<M>>,
    space: Arc<SpaceSignal>,
}

impl<M> Clone for Route<M> {
    fn clone(&self) -> Self {
        Self {
            high: self.high.clone(),
            normal: self.normal.clone(),
            space: Arc::clone(&self.space),
        }
    }
}

impl<M> Route<M> {
    fn lane(&self, priority: Priority) -> &mpsc::Sender<Envelope<M>> {
        match priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
        }
    }
}

struct BusInner<M> {
    routes: DashMap<ListenerId, Route<M>>,
    next_listener: AtomicU64,
    next_endpoint: AtomicU64,
    closed: AtomicBool,
}

impl<M> BusInner<M> {
    fn route(&self, id: ListenerId) -> Result<Route<M>, DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        self.routes
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(DispatchError::UnknownListener { id })
    }
}

/// Registry of listener mailboxes. Cheap to clone; clones share the registry.
pub struct MessageBus<M> {
    inner: Arc<BusInner<M>>,
    mailbox_capacity: usize,
}

impl<M> Clone for MessageBus<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

impl<M: Send + 'static> MessageBus<M> {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                routes: DashMap::new(),
                next_listener: AtomicU64::new(1),
                next_endpoint: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
            mailbox_capacity: config.mailbox_capacity.max(1),
        }
    }

    /// Register a mailbox with the configured lane capacity.
    pub fn register(&self) -> Result<Mailbox<M>, BusError> {
        self.register_with_capacity(self.mailbox_capacity)
    }

    /// Register a mailbox whose lanes each hold at most `capacity` messages.
    pub fn register_with_capacity(&self, capacity: usize) -> Result<Mailbox<M>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let capacity = capacity.max(1);
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let (high_tx, high_rx) = mpsc::channel(capacity);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        let space = Arc::new(SpaceSignal::default());

        self.inner.routes.insert(
            id,
            Route {
                high: high_tx,
                normal: normal_tx,
                space: Arc::clone(&space),
            },
        );
        debug!(listener = %id, capacity, "mailbox registered");

        Ok(Mailbox {
            id,
            high: high_rx,
            normal: normal_rx,
            space,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Open a sending endpoint owned by `owner` (used in logs and envelopes).
    pub fn endpoint(&self, owner: &str) -> Result<Endpoint<M>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let seq = self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed);
        let id = EndpointId {
            owner: owner.to_string(),
            seq,
        };
        debug!(endpoint = %id, "endpoint opened");
        Ok(Endpoint {
            id,
            bus: Arc::clone(&self.inner),
        })
    }

    /// Refuse further registrations and sends, and drop every route so that
    /// mailboxes drain what they hold and then report end of stream.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            let count = self.inner.routes.len();
            self.inner.routes.clear();
            info!(mailboxes = count, "message bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.routes.len()
    }
}

/// Receiving side of a listener. Dropping it unregisters the listener.
pub struct Mailbox<M> {
    id: ListenerId,
    high: mpsc::Receiver<Envelope<M>>,
    normal: mpsc::Receiver<Envelope<M>>,
    space: Arc<SpaceSignal>,
    bus: Weak<BusInner<M>>,
}

impl<M> Mailbox<M> {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Wait for the next message, high-priority lane first.
    ///
    /// Returns `None` once the bus is closed and both lanes are drained.
    pub async fn recv(&mut self) -> Option<Envelope<M>> {
        let envelope = tokio::select! {
            biased;
            Some(env) = self.high.recv() => Some(env),
            Some(env) = self.normal.recv() => Some(env),
            else => None,
        };
        if envelope.is_some() {
            self.space.notify();
        }
        envelope
    }

    /// Take a message if one is queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope<M>> {
        let envelope = match self.high.try_recv() {
            Ok(env) => Some(env),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.normal.try_recv().ok()
            }
        };
        if envelope.is_some() {
            self.space.notify();
        }
        envelope
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.routes.remove(&self.id);
            debug!(listener = %self.id, "mailbox unregistered");
        }
        // Producers parked on this mailbox retry and observe the unknown id.
        self.space.notify();
    }
}

/// Sending side of the bus.
pub struct Endpoint<M> {
    id: EndpointId,
    bus: Arc<BusInner<M>>,
}

impl<M> Endpoint<M> {
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    /// Non-blocking addressed send. On failure the body is returned.
    pub fn send_to(
        &self,
        destination: ListenerId,
        kind: MessageKind,
        priority: Priority,
        body: M,
    ) -> Result<(), Rejected<M>> {
        let route = match self.bus.route(destination) {
            Ok(route) => route,
            Err(reason) => return Err(Rejected { reason, body }),
        };
        let envelope = Envelope {
            kind,
            sender: self.id.clone(),
            destination,
            priority,
            body,
        };
        route.lane(priority).try_send(envelope).map_err(|e| match e {
            TrySendError::Full(env) => Rejected {
                reason: DispatchError::Full { id: destination },
                body: env.body,
            },
            TrySendError::Closed(env) => Rejected {
                reason: DispatchError::UnknownListener { id: destination },
                body: env.body,
            },
        })
    }

    /// Reserve one slot on the destination lane without committing a body.
    ///
    /// The slot is released again if the reservation is dropped unused.
    pub fn try_reserve(
        &self,
        destination: ListenerId,
        priority: Priority,
    ) -> Result<Reservation<M>, DispatchError> {
        let route = self.bus.route(destination)?;
        let permit = route
            .lane(priority)
            .clone()
            .try_reserve_owned()
            .map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::Full { id: destination },
                TrySendError::Closed(_) => DispatchError::UnknownListener { id: destination },
            })?;
        Ok(Reservation {
            permit,
            sender: self.id.clone(),
            destination,
            priority,
        })
    }

    /// Ask for `event` to be woken the next time `destination` takes a
    /// message off any lane.
    ///
    /// Returns `true` if the lane already has room again (or the destination
    /// is gone), in which case the caller should retry without waiting for
    /// the signal.
    pub fn notify_on_space(
        &self,
        destination: ListenerId,
        priority: Priority,
        event: &Arc<Event>,
    ) -> bool {
        match self.bus.route(destination) {
            Ok(route) => {
                route.space.register(event);
                // Checked after registering: a receive that raced the failed
                // send either shows up here or fires the signal.
                route.lane(priority).capacity() > 0
            }
            Err(_) => true,
        }
    }
}

/// A reserved slot in a mailbox lane; sending through it cannot fail.
pub struct Reservation<M> {
    permit: OwnedPermit<Envelope<M>>,
    sender: EndpointId,
    destination: ListenerId,
    priority: Priority,
}

impl<M> Reservation<M> {
    pub fn send(self, kind: MessageKind, body: M) {
        let envelope = Envelope {
            kind,
            sender: self.sender,
            destination: self.destination,
            priority: self.priority,
            body,
        };
        self.permit.send(envelope);
    }
}
