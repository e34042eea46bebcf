//! Request/response correlation.
//!
//! The correlator maps outbound requests to their pending callers and routes
//! inbound frames back to them. It is a plain state machine with no I/O; the
//! [`SocketClient`](super::SocketClient) holds it behind a single mutex and
//! performs the writes it asks for.
//!
//! # State
//!
//! | Collection | Holds |
//! |------------|-------|
//! | entries | pending callers keyed by request ID, or by subscription ID once acknowledged |
//! | publishers | caller-named shared streams and their listeners |
//! | outbound | requests accepted while not connected, FIFO |
//! | raw | already-correlated payloads accepted while not connected, FIFO |
//! | dormant | subscription streams whose server-side state was lost on reconnect |
//!
//! # Reconnect
//!
//! On `Connected` the client calls [`RequestCorrelator::begin_reconnect`],
//! which sends [`RequestError::Connected`] once to every subscription of the
//! previous connection, then drains the queues through
//! [`RequestCorrelator::next_flush`] until it returns `None`. Only then is the
//! correlator considered connected and new requests written directly.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::mem;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::error::RequestError;
use crate::identifiers::{CorrelationId, PublisherId};
use crate::protocol::{Envelope, Response};

// ============================================================================
// Types
// ============================================================================

/// What a pending caller receives.
pub type Reply = Result<Response, RequestError>;

/// Where replies for one request go.
#[derive(Debug)]
pub enum Sink {
    /// Single response, then the entry is removed.
    Once(oneshot::Sender<Reply>),
    /// Subscription stream owned by one caller.
    Stream(mpsc::UnboundedSender<Reply>),
    /// Shared publisher stream.
    Publisher(PublisherId),
}

/// A request accepted by the correlator.
#[derive(Debug)]
pub struct QueuedRequest {
    id: CorrelationId,
    payload: String,
    subscription: bool,
    /// `None` for fire-and-forget.
    sink: Option<Sink>,
}

impl QueuedRequest {
    /// One-shot request.
    #[must_use]
    pub fn once(id: CorrelationId, payload: String) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id,
            payload,
            subscription: false,
            sink: Some(Sink::Once(tx)),
        };
        (request, rx)
    }

    /// Subscription with its own stream.
    #[must_use]
    pub fn stream(id: CorrelationId, payload: String) -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = Self {
            id,
            payload,
            subscription: true,
            sink: Some(Sink::Stream(tx)),
        };
        (request, rx)
    }

    /// Subscription feeding a shared publisher.
    #[must_use]
    pub fn publisher(id: CorrelationId, payload: String, publisher: PublisherId) -> Self {
        Self {
            id,
            payload,
            subscription: true,
            sink: Some(Sink::Publisher(publisher)),
        }
    }

    /// Write without expecting a reply.
    #[must_use]
    pub fn forget(id: CorrelationId, payload: String) -> Self {
        Self {
            id,
            payload,
            subscription: false,
            sink: None,
        }
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    fn is_one_shot(&self) -> bool {
        self.sink.is_some() && !self.subscription
    }
}

/// A payload the client must write now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A request; `tracked` if a pending entry waits for its reply.
    Request {
        id: CorrelationId,
        payload: String,
        tracked: bool,
    },
    /// An already-correlated payload.
    Raw { id: CorrelationId, payload: String },
}

impl Outbound {
    /// Returns the payload to write.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &str {
        match self {
            Self::Request { payload, .. } | Self::Raw { payload, .. } => payload,
        }
    }

    /// Returns the correlation ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &CorrelationId {
        match self {
            Self::Request { id, .. } | Self::Raw { id, .. } => id,
        }
    }
}

/// Result of routing a request.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// Connected: the entry is registered, write this now.
    Send(Outbound),
    /// Not connected: queued until the next flush.
    Queued,
}

/// Result of handling an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Delivered to a pending caller.
    Delivered,
    /// Matched no pending caller.
    Unmatched,
    /// Not a JSON object.
    Malformed,
}

#[derive(Debug)]
struct PendingEntry {
    sink: Sink,
    subscription: bool,
}

// ============================================================================
// RequestCorrelator
// ============================================================================

/// Correlation state for one client.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    entries: FxHashMap<CorrelationId, PendingEntry>,
    publishers: FxHashMap<PublisherId, Vec<mpsc::UnboundedSender<Reply>>>,
    outbound: VecDeque<QueuedRequest>,
    raw: VecDeque<(CorrelationId, String)>,
    dormant: Vec<(CorrelationId, mpsc::UnboundedSender<Reply>)>,
    connected: bool,
}

impl RequestCorrelator {
    /// Creates an empty, disconnected correlator.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the queues have been flushed after `Connected`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of pending entries.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.entries.len()
    }

    /// Number of queued requests and raw payloads.
    #[inline]
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.outbound.len() + self.raw.len()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Registers a request and decides whether to write it now.
    ///
    /// The entry is registered before the payload is handed back, so a reply
    /// can never arrive ahead of its registration.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::DuplicateId`] if a live request with the same
    /// ID is pending or queued. The existing request is unaffected.
    pub fn route(&mut self, request: QueuedRequest) -> Result<Route, RequestError> {
        if request.sink.is_some() && self.is_duplicate(&request.id) {
            debug!(id = %request.id, "Rejected duplicate correlation id");
            return Err(RequestError::DuplicateId(request.id));
        }

        if let Some(Sink::Publisher(publisher)) = &request.sink {
            self.publishers.entry(publisher.clone()).or_default();
        }

        if !self.connected {
            trace!(id = %request.id, queued = self.outbound.len() + 1, "Request queued");
            self.outbound.push_back(request);
            return Ok(Route::Queued);
        }

        Ok(Route::Send(self.register(request)))
    }

    /// Routes an already-correlated payload.
    pub fn route_raw(&mut self, id: CorrelationId, payload: String) -> Route {
        if self.connected {
            return Route::Send(Outbound::Raw { id, payload });
        }

        trace!(%id, queued = self.raw.len() + 1, "Raw payload queued");
        self.raw.push_back((id, payload));
        Route::Queued
    }

    /// Returns the next batch to write after `Connected`.
    ///
    /// Returns `None` when both queues are empty, and from then on routes
    /// requests directly.
    pub fn next_flush(&mut self) -> Option<Vec<Outbound>> {
        if self.outbound.is_empty() && self.raw.is_empty() {
            if !self.connected {
                debug!(pending = self.entries.len(), "Correlator connected");
            }
            self.connected = true;
            return None;
        }

        let queued = mem::take(&mut self.outbound);
        let mut batch = Vec::with_capacity(queued.len() + self.raw.len());

        for request in queued {
            let abandoned = request
                .sink
                .as_ref()
                .is_some_and(|sink| sink_closed(sink, &self.publishers));
            if abandoned {
                trace!(id = %request.id, "Dropped abandoned request");
                continue;
            }

            if request.sink.is_some() && self.entries.contains_key(&request.id) {
                warn!(id = %request.id, "Queued request collides with pending entry");
                if let Some(sink) = request.sink {
                    let error = RequestError::DuplicateId(request.id);
                    fail(&mut self.publishers, sink, error, &mut FxHashSet::default());
                }
                continue;
            }

            batch.push(self.register(request));
        }

        batch.extend(
            self.raw
                .drain(..)
                .map(|(id, payload)| Outbound::Raw { id, payload }),
        );

        debug!(count = batch.len(), "Flushing queued requests");
        Some(batch)
    }

    /// Puts unwritten payloads back at the front of their queues.
    ///
    /// Pending entries registered for them are moved back with them; requests
    /// whose entry is already gone (timed out, failed) are dropped.
    pub fn requeue(&mut self, items: Vec<Outbound>) {
        self.connected = false;
        let mut requests = Vec::new();
        let mut raw = Vec::new();

        for item in items {
            match item {
                Outbound::Request {
                    id,
                    payload,
                    tracked: true,
                } => match self.entries.remove(&id) {
                    Some(entry) => requests.push(QueuedRequest {
                        id,
                        payload,
                        subscription: entry.subscription,
                        sink: Some(entry.sink),
                    }),
                    None => trace!(%id, "Not requeued, caller already gone"),
                },
                Outbound::Request { id, payload, .. } => {
                    requests.push(QueuedRequest::forget(id, payload));
                }
                Outbound::Raw { id, payload } => raw.push((id, payload)),
            }
        }

        debug!(requests = requests.len(), raw = raw.len(), "Requeued unwritten payloads");

        for request in requests.into_iter().rev() {
            self.outbound.push_front(request);
        }
        for item in raw.into_iter().rev() {
            self.raw.push_front(item);
        }
    }

    fn register(&mut self, request: QueuedRequest) -> Outbound {
        let QueuedRequest {
            id,
            payload,
            subscription,
            sink,
        } = request;

        let tracked = sink.is_some();
        if let Some(sink) = sink {
            self.entries
                .insert(id.clone(), PendingEntry { sink, subscription });
        }

        Outbound::Request {
            id,
            payload,
            tracked,
        }
    }

    fn is_duplicate(&self, id: &CorrelationId) -> bool {
        let pending = self
            .entries
            .get(id)
            .is_some_and(|entry| !sink_closed(&entry.sink, &self.publishers));
        let queued = self
            .outbound
            .iter()
            .any(|queued| &queued.id == id && queued.sink.is_some());

        pending || queued
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Routes an inbound text frame to its pending caller.
    ///
    /// A frame whose `id` matches an entry is delivered to it. One-shot
    /// entries are then removed; subscription entries are re-keyed to the
    /// subscription ID carried in the same frame. A frame without an `id` is
    /// delivered by subscription ID, without removing the entry.
    pub fn on_frame(&mut self, text: &str) -> FrameOutcome {
        let Ok(Envelope {
            id,
            subscription,
            value,
        }) = Envelope::parse(text)
        else {
            debug!(len = text.len(), "Ignored malformed frame");
            return FrameOutcome::Malformed;
        };

        let matched = id
            .as_ref()
            .and_then(|id| self.entries.remove(id).map(|entry| (id.clone(), entry)));

        if let Some((id, entry)) = matched {
            let response = Response::new(text.to_owned(), value);
            let subscription_entry = entry.subscription;

            match deliver(&mut self.publishers, entry.sink, Ok(response)) {
                Delivery::Alive(sink) if subscription_entry => match subscription {
                    Some(key) => {
                        trace!(%id, subscription = %key, "Subscription acknowledged");
                        self.rekey(key, PendingEntry {
                            sink,
                            subscription: true,
                        });
                    }
                    None => debug!(%id, "Subscription ended without an id"),
                },
                Delivery::Alive(_) | Delivery::Consumed => trace!(%id, "Response delivered"),
                Delivery::Closed(publisher) => self.drop_publisher_entries(publisher),
            }
            return FrameOutcome::Delivered;
        }

        let Some(key) = subscription.filter(|key| id.is_none() && self.entries.contains_key(key))
        else {
            trace!(id = ?id, "Unmatched frame");
            return FrameOutcome::Unmatched;
        };

        let Some(entry) = self.entries.remove(&key) else {
            return FrameOutcome::Unmatched;
        };
        let response = Response::new(text.to_owned(), value);

        match deliver(&mut self.publishers, entry.sink, Ok(response)) {
            Delivery::Alive(sink) => {
                self.entries.insert(key, PendingEntry {
                    sink,
                    subscription: entry.subscription,
                });
            }
            Delivery::Consumed => {}
            Delivery::Closed(publisher) => self.drop_publisher_entries(publisher),
        }

        FrameOutcome::Delivered
    }

    fn rekey(&mut self, key: CorrelationId, entry: PendingEntry) {
        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            debug!(subscription = %key, "Subscription id reused, previous stream parked");
            if let Sink::Stream(tx) = previous.sink {
                self.dormant.push((key, tx));
            }
        }
    }

    fn drop_publisher_entries(&mut self, publisher: PublisherId) {
        debug!(%publisher, "Publisher has no listeners, removing");
        self.publishers.remove(&publisher);
        self.entries
            .retain(|_, entry| !matches!(&entry.sink, Sink::Publisher(p) if *p == publisher));
    }

    // ========================================================================
    // Connection Changes
    // ========================================================================

    /// Starts a reconnect: signals every subscription of the previous
    /// connection once with [`RequestError::Connected`].
    ///
    /// Subscription streams stay open; their server-side state is gone, so
    /// they are parked until the caller unsubscribes. Leftover one-shot
    /// entries fail with [`RequestError::NoConnection`]. Returns the number
    /// of sinks signalled.
    pub fn begin_reconnect(&mut self) -> usize {
        self.connected = false;
        let mut signalled = 0;

        // Parked streams lose their state again
        self.dormant
            .retain(|(_, tx)| tx.send(Err(RequestError::Connected)).is_ok());
        signalled += self.dormant.len();

        let mut publishers = FxHashSet::default();

        for (id, entry) in self.entries.drain() {
            match entry.sink {
                Sink::Once(tx) => {
                    let _ = tx.send(Err(RequestError::NoConnection));
                }
                Sink::Stream(tx) => {
                    if tx.send(Err(RequestError::Connected)).is_ok() {
                        signalled += 1;
                        self.dormant.push((id, tx));
                    }
                }
                Sink::Publisher(publisher) => {
                    publishers.insert(publisher);
                }
            }
        }

        for publisher in publishers {
            if publish(&mut self.publishers, &publisher, &Err(RequestError::Connected)) {
                signalled += 1;
            }
        }

        debug!(signalled, queued = self.queued_len(), "Reconnect started");
        signalled
    }

    /// Fails pending callers after the connection went away.
    ///
    /// One-shot requests, pending or queued, always fail with `error`. With
    /// `include_subscriptions`, subscriptions and both queues are failed and
    /// cleared too; otherwise they are kept for the next reconnect.
    /// Publishers stay registered either way.
    pub fn on_disconnect(&mut self, error: RequestError, include_subscriptions: bool) {
        self.connected = false;
        let mut signalled = FxHashSet::default();

        let failing: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| include_subscriptions || !entry.subscription)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &failing {
            if let Some(entry) = self.entries.remove(id) {
                fail(&mut self.publishers, entry.sink, error.clone(), &mut signalled);
            }
        }

        let queued = mem::take(&mut self.outbound);
        for request in queued {
            if include_subscriptions || request.is_one_shot() {
                if let Some(sink) = request.sink {
                    fail(&mut self.publishers, sink, error.clone(), &mut signalled);
                }
            } else {
                self.outbound.push_back(request);
            }
        }

        if include_subscriptions {
            for (_, tx) in self.dormant.drain(..) {
                let _ = tx.send(Err(error.clone()));
            }
            self.raw.clear();
        }

        debug!(
            %error,
            failed = failing.len(),
            include_subscriptions,
            remaining = self.entries.len(),
            "Pending requests failed"
        );
    }

    /// Fails everything with [`RequestError::NoConnection`] and clears all
    /// state, publishers included.
    pub fn reset(&mut self) {
        let error = RequestError::NoConnection;
        let entries = self.entries.len();

        for (_, entry) in self.entries.drain() {
            match entry.sink {
                Sink::Once(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
                Sink::Stream(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
                Sink::Publisher(_) => {}
            }
        }

        for request in self.outbound.drain(..) {
            match request.sink {
                Some(Sink::Once(tx)) => {
                    let _ = tx.send(Err(error.clone()));
                }
                Some(Sink::Stream(tx)) => {
                    let _ = tx.send(Err(error.clone()));
                }
                Some(Sink::Publisher(_)) | None => {}
            }
        }

        for (_, listeners) in self.publishers.drain() {
            for tx in listeners {
                let _ = tx.send(Err(error.clone()));
            }
        }

        for (_, tx) in self.dormant.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }

        self.raw.clear();
        self.connected = false;
        debug!(entries, "Correlator reset");
    }

    // ========================================================================
    // Caller Management
    // ========================================================================

    /// Registers a publisher. Returns `false` if it already exists.
    pub fn register_publisher(&mut self, id: PublisherId) -> bool {
        if self.publishers.contains_key(&id) {
            return false;
        }
        self.publishers.insert(id, Vec::new());
        true
    }

    /// Adds a listener to a publisher, registering it if needed.
    pub fn attach_publisher(&mut self, id: PublisherId) -> mpsc::UnboundedReceiver<Reply> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.publishers.entry(id).or_default().push(tx);
        rx
    }

    /// Removes a publisher, ending its listeners' streams.
    pub fn close_publisher(&mut self, id: &PublisherId) -> bool {
        let existed = self.publishers.remove(id).is_some();

        self.entries
            .retain(|_, entry| !matches!(&entry.sink, Sink::Publisher(p) if p == id));
        self.outbound
            .retain(|request| !matches!(&request.sink, Some(Sink::Publisher(p)) if p == id));

        existed
    }

    /// Removes a subscription by request or subscription ID, ending its
    /// stream.
    pub fn unsubscribe(&mut self, id: &CorrelationId) -> bool {
        let pending = match self.entries.get(id) {
            Some(entry) if entry.subscription => self.entries.remove(id).is_some(),
            _ => false,
        };

        let parked = self.dormant.len();
        self.dormant.retain(|(key, _)| key != id);

        let queued = self.outbound.len();
        self.outbound
            .retain(|request| !(request.subscription && &request.id == id));

        pending || parked != self.dormant.len() || queued != self.outbound.len()
    }

    /// Drops the pending entry or queued request for `id` without notifying
    /// its caller.
    pub fn forget(&mut self, id: &CorrelationId) -> bool {
        if self.entries.remove(id).is_some() {
            return true;
        }

        let queued = self.outbound.len();
        self.outbound
            .retain(|request| !(&request.id == id && request.sink.is_some()));
        queued != self.outbound.len()
    }
}

// ============================================================================
// Delivery
// ============================================================================

enum Delivery {
    /// Still listening; the sink is handed back.
    Alive(Sink),
    /// One-shot sink used up.
    Consumed,
    /// Every listener of this publisher is gone.
    Closed(PublisherId),
}

fn deliver(
    publishers: &mut FxHashMap<PublisherId, Vec<mpsc::UnboundedSender<Reply>>>,
    sink: Sink,
    reply: Reply,
) -> Delivery {
    match sink {
        Sink::Once(tx) => {
            let _ = tx.send(reply);
            Delivery::Consumed
        }
        Sink::Stream(tx) => {
            if tx.send(reply).is_ok() {
                Delivery::Alive(Sink::Stream(tx))
            } else {
                Delivery::Consumed
            }
        }
        Sink::Publisher(publisher) => {
            if publish(publishers, &publisher, &reply) {
                Delivery::Alive(Sink::Publisher(publisher))
            } else {
                Delivery::Closed(publisher)
            }
        }
    }
}

/// Sends to every listener of a publisher. Returns `false` if none is left.
fn publish(
    publishers: &mut FxHashMap<PublisherId, Vec<mpsc::UnboundedSender<Reply>>>,
    id: &PublisherId,
    reply: &Reply,
) -> bool {
    let Some(listeners) = publishers.get_mut(id) else {
        return false;
    };

    listeners.retain(|tx| tx.send(reply.clone()).is_ok());
    !listeners.is_empty()
}

/// Delivers `error`, once per publisher.
fn fail(
    publishers: &mut FxHashMap<PublisherId, Vec<mpsc::UnboundedSender<Reply>>>,
    sink: Sink,
    error: RequestError,
    signalled: &mut FxHashSet<PublisherId>,
) {
    match sink {
        Sink::Once(tx) => {
            let _ = tx.send(Err(error));
        }
        Sink::Stream(tx) => {
            let _ = tx.send(Err(error));
        }
        Sink::Publisher(publisher) => {
            if signalled.insert(publisher.clone()) {
                publish(publishers, &publisher, &Err(error));
            }
        }
    }
}

fn sink_closed(
    sink: &Sink,
    publishers: &FxHashMap<PublisherId, Vec<mpsc::UnboundedSender<Reply>>>,
) -> bool {
    match sink {
        Sink::Once(tx) => tx.is_closed(),
        Sink::Stream(tx) => tx.is_closed(),
        Sink::Publisher(publisher) => publishers
            .get(publisher)
            .is_none_or(|listeners| listeners.iter().all(mpsc::UnboundedSender::is_closed)),
    }
}

// ============================================================================
// Tests
// ============================================================================
