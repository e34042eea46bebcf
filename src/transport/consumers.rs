//! Consumer registry and event streams.
//!
//! Every [`WebSocket::connect`](super::WebSocket::connect) call adds one
//! consumer: an unbounded channel the transport pushes [`Event`]s into. The
//! registry is the only fan-out point, so all consumers see the same events
//! in the same order, and a closed consumer is pruned without affecting the
//! others.
//!
//! When the last consumer detaches the owning transport is told to
//! disconnect; a transport never keeps a socket open with nobody listening.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::identifiers::ConsumerId;

use super::event::Event;

// ============================================================================
// Types
// ============================================================================

/// Sending half of a consumer.
type EventSink = mpsc::UnboundedSender<Event>;

/// Result of removing a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Other consumers remain.
    Remaining(usize),
    /// This removal emptied the registry.
    BecameEmpty,
    /// The consumer was not registered.
    Unknown,
}

// ============================================================================
// ConsumerRegistry
// ============================================================================

/// Set of live consumers keyed by identity.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    consumers: Mutex<FxHashMap<ConsumerId, EventSink>>,
}

impl ConsumerRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new consumer.
    #[must_use]
    pub fn add(&self) -> (ConsumerId, mpsc::UnboundedReceiver<Event>) {
        self.add_with(None)
    }

    /// Registers a new consumer, seeding it with `initial` if given.
    ///
    /// The seed is queued before the consumer becomes visible to
    /// [`broadcast`](Self::broadcast).
    #[must_use]
    pub fn add_with(&self, initial: Option<Event>) -> (ConsumerId, mpsc::UnboundedReceiver<Event>) {
        let id = ConsumerId::generate();
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(event) = initial {
            // Receiver is alive, so this cannot fail
            let _ = tx.send(event);
        }

        let mut consumers = self.consumers.lock();
        consumers.insert(id, tx);
        trace!(%id, count = consumers.len(), "Consumer added");

        (id, rx)
    }

    /// Unregisters a consumer.
    pub fn remove(&self, id: ConsumerId) -> Membership {
        let mut consumers = self.consumers.lock();

        if consumers.remove(&id).is_none() {
            return Membership::Unknown;
        }

        trace!(%id, count = consumers.len(), "Consumer removed");

        match consumers.len() {
            0 => Membership::BecameEmpty,
            n => Membership::Remaining(n),
        }
    }

    /// Pushes `event` to every live consumer.
    ///
    /// Consumers whose receiver is gone are pruned. Returns `false` if no
    /// consumer is left afterwards.
    pub fn broadcast(&self, event: &Event) -> bool {
        let mut consumers = self.consumers.lock();

        consumers.retain(|id, sink| {
            let alive = sink.send(event.clone()).is_ok();
            if !alive {
                trace!(%id, "Pruned closed consumer");
            }
            alive
        });

        !consumers.is_empty()
    }

    /// Drops every consumer, ending their streams after queued events.
    pub fn discard_all(&self) -> usize {
        let mut consumers = self.consumers.lock();
        let count = consumers.len();
        consumers.clear();
        count
    }

    /// Number of registered consumers.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.lock().len()
    }

    /// Returns `true` if no consumer is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.lock().is_empty()
    }
}

// ============================================================================
// Release
// ============================================================================

/// Owner notified when an [`EventStream`] is dropped.
pub(crate) trait Release: Send + Sync {
    /// Unregisters `id` and reacts if the registry became empty.
    fn release(&self, id: ConsumerId);
}

/// Unregisters the consumer on drop.
struct ConsumerGuard {
    id: ConsumerId,
    owner: Weak<dyn Release>,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.release(self.id);
        }
    }
}

// ============================================================================
// EventStream
// ============================================================================

/// Stream of transport events for one consumer.
///
/// Ends after [`Event::Disconnected`]. Dropping it detaches the consumer;
/// dropping the last one disconnects the transport.
pub struct EventStream {
    // Declared first: the consumer is unregistered before its receiver closes
    guard: ConsumerGuard,
    events: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    pub(crate) fn new(
        id: ConsumerId,
        events: mpsc::UnboundedReceiver<Event>,
        owner: Weak<dyn Release>,
    ) -> Self {
        Self {
            guard: ConsumerGuard { id, owner },
            events,
        }
    }

    /// Returns this consumer's identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.guard.id
    }

    /// Receives the next event, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Returns the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.guard.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
