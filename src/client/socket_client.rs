//! Request layer over the transport.
//!
//! [`SocketClient`] multiplexes one-shot requests, fire-and-forget sends and
//! long-lived subscriptions over a single [`WebSocket`]. It attaches one
//! consumer to the transport and feeds that consumer's events into the
//! [`RequestCorrelator`].
//!
//! # Event Handling
//!
//! | Transport event | Correlator action |
//! |-----------------|-------------------|
//! | `Connected` | resubscribe signal, then flush queues in FIFO order |
//! | `ViabilityChanged(false)` | fail one-shot requests, keep subscriptions |
//! | `Disconnected` | fail everything |
//! | `Text` | route frame to its caller |
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use wallet_socket::{Result, SocketClient};
//!
//! # async fn example() -> Result<()> {
//! let client = SocketClient::builder("wss://node.example.com/ws").build_client()?;
//!
//! let request = client.rpc("eth_blockNumber", json!([]))?;
//! let block: String = client.send(request).await?.result()?;
//!
//! let heads = client.rpc("eth_subscribe", json!(["newHeads"]))?.subscribing();
//! let mut heads = client.subscribe(heads).await?;
//! while let Some(frame) = heads.recv().await {
//!     println!("{:?}", frame);
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::WebSocketBuilder;
use crate::error::{Error, RequestError, Result};
use crate::identifiers::{CorrelationId, PublisherId};
use crate::protocol::{Response, SocketRequest};
use crate::transport::{CloseCode, ConnectionState, Event, EventStream, WebSocket};

use super::correlator::{FrameOutcome, Outbound, QueuedRequest, RequestCorrelator, Route};
use super::path::SocketPath;
use super::subscription::{Subscription, TypedSubscription};

// ============================================================================
// SocketClient
// ============================================================================

/// JSON request client over a persistent WebSocket.
///
/// Cheap to clone; clones share the connection and pending requests. When
/// the last clone is dropped every pending caller fails with
/// [`RequestError::NoConnection`] and the connection closes.
#[derive(Clone)]
pub struct SocketClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    socket: WebSocket,
    correlator: Mutex<RequestCorrelator>,
    /// Task feeding transport events into the correlator.
    listener: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
    next_id: AtomicI64,
}

impl SocketClient {
    /// Creates a builder for `url`. Finish with
    /// [`build_client`](WebSocketBuilder::build_client).
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>) -> WebSocketBuilder {
        WebSocketBuilder::new(url)
    }

    /// Wraps a transport. The connection opens on first use.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let request_timeout = socket.configuration().request_timeout;

        Self {
            inner: Arc::new(ClientInner {
                socket,
                correlator: Mutex::new(RequestCorrelator::new()),
                listener: Mutex::new(None),
                request_timeout,
                next_id: AtomicI64::new(1),
            }),
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Sends a request and waits for its response.
    ///
    /// Queued while not connected. The request timeout covers queueing.
    ///
    /// # Errors
    ///
    /// - [`RequestError::DuplicateId`] if a request with the same ID is pending
    /// - [`RequestError::NoConnection`] if the connection is lost first
    /// - [`RequestError::Timeout`] if no response arrives in time
    pub async fn send(&self, request: SocketRequest) -> Result<Response> {
        self.ensure_listening();

        let (id, payload, _, _) = request.into_parts();
        let (queued, reply) = QueuedRequest::once(id.clone(), payload);
        self.inner.dispatch(queued).await?;

        match timeout(self.inner.request_timeout, reply).await {
            Ok(Ok(reply)) => Ok(reply?),
            Ok(Err(_)) => Err(Error::from(RequestError::NoConnection)),
            Err(_) => {
                self.inner.correlator.lock().forget(&id);
                let timeout_ms =
                    u64::try_from(self.inner.request_timeout.as_millis()).unwrap_or(u64::MAX);
                debug!(%id, timeout_ms, "Request timed out");
                Err(RequestError::Timeout { id, timeout_ms }.into())
            }
        }
    }

    /// Opens a subscription.
    ///
    /// With a publisher set on the request, the returned stream is a
    /// listener on that shared publisher.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::DuplicateId`] if a request with the same ID is
    /// pending.
    pub async fn subscribe(&self, request: SocketRequest) -> Result<Subscription> {
        self.ensure_listening();

        let (id, payload, _, publisher) = request.into_parts();
        let (queued, replies) = match publisher {
            Some(publisher) => {
                let replies = self.inner.correlator.lock().attach_publisher(publisher.clone());
                (QueuedRequest::publisher(id.clone(), payload, publisher), replies)
            }
            None => QueuedRequest::stream(id.clone(), payload),
        };

        self.inner.dispatch(queued).await?;
        Ok(Subscription::new(id, replies))
    }

    /// Sends a request without waiting for a response.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed request; the write itself is not
    /// reported.
    pub async fn send_and_forget(&self, request: SocketRequest) -> Result<()> {
        self.ensure_listening();

        let (id, payload, _, _) = request.into_parts();
        self.inner.dispatch(QueuedRequest::forget(id, payload)).await
    }

    /// Sends an already-correlated payload, queueing it while not connected.
    ///
    /// # Errors
    ///
    /// Never fails; the write itself is not reported.
    pub async fn send_raw(&self, id: CorrelationId, payload: impl Into<String>) -> Result<()> {
        self.ensure_listening();

        let route = self.inner.correlator.lock().route_raw(id, payload.into());
        if let Route::Send(outbound) = route {
            self.inner.write(outbound).await;
        }
        Ok(())
    }

    /// Sends a typed request and decodes its result.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), plus [`Error::Rpc`] and
    /// [`Error::Json`] from decoding.
    pub async fn call<P: SocketPath>(&self, path: &P) -> Result<P::Output> {
        let request = path.request(self.next_id())?;
        self.send(request).await?.result()
    }

    /// Opens a typed subscription.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub async fn watch<P: SocketPath>(&self, path: &P) -> Result<TypedSubscription<P::Output>> {
        let request = path.request(self.next_id())?.subscribing();
        Ok(self.subscribe(request).await?.typed())
    }

    /// Builds a JSON-RPC request with the next client ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `params` fails to serialize.
    pub fn rpc(&self, method: &str, params: Value) -> Result<SocketRequest> {
        SocketRequest::rpc(self.next_id(), method, params)
    }

    /// Returns a fresh numeric correlation ID.
    #[inline]
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Attaches a listener to a shared publisher without subscribing.
    #[must_use]
    pub fn publisher(&self, id: impl Into<PublisherId>) -> Subscription {
        let id = id.into();
        let replies = self.inner.correlator.lock().attach_publisher(id.clone());
        Subscription::new(CorrelationId::Text(id.as_str().to_string()), replies)
    }

    /// Ends a subscription by request or subscription ID.
    ///
    /// Only the local stream is closed; sending the server-side unsubscribe
    /// request is up to the caller.
    pub fn unsubscribe(&self, id: &CorrelationId) -> bool {
        self.inner.correlator.lock().unsubscribe(id)
    }

    /// Removes a shared publisher, ending its listeners' streams.
    pub fn close_publisher(&self, id: &PublisherId) -> bool {
        self.inner.correlator.lock().close_publisher(id)
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Closes the connection. Every pending caller fails with
    /// [`RequestError::NoConnection`]; the next request reconnects.
    pub fn disconnect(&self) {
        self.inner.socket.disconnect(CloseCode::Normal);
    }

    /// Returns the transport.
    #[inline]
    #[must_use]
    pub fn socket(&self) -> &WebSocket {
        &self.inner.socket
    }

    /// Returns the transport state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.socket.state()
    }

    /// Attaches to the transport unless already listening.
    fn ensure_listening(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let events = self.inner.socket.connect();
        trace!(consumer = %events.id(), "Client listener started");
        *listener = Some(tokio::spawn(listen(Arc::downgrade(&self.inner), events)));
    }
}

impl fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketClient")
            .field("socket", &self.inner.socket)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientInner
// ============================================================================

impl ClientInner {
    async fn dispatch(&self, request: QueuedRequest) -> Result<()> {
        let route = self.correlator.lock().route(request)?;
        if let Route::Send(outbound) = route {
            self.write(outbound).await;
        }
        Ok(())
    }

    /// Writes one payload, requeueing it if the transport is not ready.
    async fn write(&self, outbound: Outbound) {
        if let Err(e) = self.socket.send_text(outbound.payload()).await {
            debug!(id = %outbound.id(), error = %e, "Write failed, requeueing");
            self.correlator.lock().requeue(vec![outbound]);
        }
    }

    /// Writes a batch in order. Returns the unwritten tail on failure.
    async fn write_all(&self, batch: Vec<Outbound>) -> std::result::Result<(), Vec<Outbound>> {
        let mut items = batch.into_iter();

        while let Some(item) = items.next() {
            if let Err(e) = self.socket.send_text(item.payload()).await {
                warn!(id = %item.id(), error = %e, "Flush interrupted");
                let mut unsent = vec![item];
                unsent.extend(items);
                return Err(unsent);
            }
        }

        Ok(())
    }

    async fn on_connected(&self) {
        let signalled = self.correlator.lock().begin_reconnect();
        if signalled > 0 {
            debug!(signalled, "Subscriptions asked to resubscribe");
        }

        loop {
            let Some(batch) = self.correlator.lock().next_flush() else {
                break;
            };

            if let Err(unsent) = self.write_all(batch).await {
                self.correlator.lock().requeue(unsent);
                break;
            }
        }
    }

    fn on_event(&self, event: Event) {
        match event {
            Event::ViabilityChanged(false) => {
                self.correlator
                    .lock()
                    .on_disconnect(RequestError::NoConnection, false);
            }
            Event::Disconnected => {
                self.correlator
                    .lock()
                    .on_disconnect(RequestError::NoConnection, true);
            }
            Event::Text(text) => {
                if self.correlator.lock().on_frame(&text) == FrameOutcome::Malformed {
                    warn!(len = text.len(), "Malformed frame dropped");
                }
            }
            Event::Error(error) => warn!(%error, "Transport error"),
            Event::ConnectionError(error) => warn!(%error, "Endpoint unreachable"),
            other => trace!(event = ?other, "Event ignored"),
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.correlator.get_mut().reset();
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
    }
}

/// Listener task body.
async fn listen(client: Weak<ClientInner>, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            break;
        };

        if event == Event::Connected {
            inner.on_connected().await;
        } else {
            inner.on_event(event);
        }
    }

    if let Some(inner) = client.upgrade() {
        inner
            .correlator
            .lock()
            .on_disconnect(RequestError::NoConnection, true);
    }

    trace!("Client listener terminated");
}

// ============================================================================
// Tests
// ============================================================================
