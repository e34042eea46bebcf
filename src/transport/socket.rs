//! WebSocket transport and its event loop.
//!
//! One [`WebSocket`] owns at most one physical connection. A tokio task (the
//! session task) is the single writer of the connection state; callers talk
//! to it through a command channel, and it talks to callers through the
//! [`ConsumerRegistry`].
//!
//! # Event Loop
//!
//! The session task handles:
//!
//! - Dialing and the WebSocket upgrade
//! - Incoming frames, broadcast to every consumer
//! - Outgoing frames from [`WebSocket::send_text`] and friends
//! - Keepalive pings and pong accounting
//! - Connectivity waits and re-dials after recoverable failures
//!
//! ```text
//!   connect() ──► Pending ──dial ok──► Connected ──► pump frames/commands
//!                   ▲  │                                  │
//!                   │  └─ unreachable / TLS ─► probe ◄────┤ lost / 3 missed pongs
//!                   │          │ ok: 500ms grace, re-dial │
//!                   └──────────┘                          │ close / reset / fatal
//!                                                         ▼
//!                       Disconnected ◄─────────────── Pending
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, error, info, trace, warn};

use crate::config::{Configuration, Endpoint, WebSocketBuilder};
use crate::error::{Error, Result};
use crate::identifiers::ConsumerId;

use super::connectivity::{ConnectivityProbe, ConnectivityState};
use super::consumers::{ConsumerRegistry, EventStream, Membership, Release};
use super::dial::{Failure, SocketStream, dial};
use super::event::{ConnectionState, Event, TransportError};
use super::keepalive::{Beat, KeepAlive};
use super::tls::TrustVerifier;

// ============================================================================
// Constants
// ============================================================================

/// Pause between a successful probe and re-dialing the data connection.
pub const RESTART_GRACE: Duration = Duration::from_millis(500);

/// Bound on the closing handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffered state transitions per [`WebSocket::state_changes`] receiver.
const STATE_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Types
// ============================================================================

type FrameSink = SplitSink<SocketStream, Message>;
type FrameSource = SplitStream<SocketStream>;

/// Internal commands for the session task.
enum Command {
    /// Write a frame; acknowledge once written if `ack` is set.
    Send {
        message: Message,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    /// Close the connection and end the session.
    Disconnect { code: CloseCode, cause: Cause },
}

/// Why a session was closed on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    /// [`WebSocket::disconnect`] was called.
    Requested,
    /// The last consumer detached.
    LastConsumer,
    /// The peer sent a close frame.
    Remote,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Closed(Cause),
    Failed,
}

/// Result of handling one inbound frame.
enum Flow {
    Continue,
    Deserted,
    PeerClosed,
}

/// Why the frame pump stopped.
enum Exit {
    Close(CloseCode, Cause),
    PeerClosed,
    Failed(Error),
}

// ============================================================================
// WebSocket
// ============================================================================

/// Persistent WebSocket transport.
///
/// Cheap to clone; clones share the connection. The connection is opened by
/// the first [`connect`](Self::connect) and closed by
/// [`disconnect`](Self::disconnect) or when the last [`EventStream`] is
/// dropped.
///
/// # Thread Safety
///
/// `WebSocket` is `Send + Sync`. All methods are non-blocking; `connect`
/// must be called from within a tokio runtime.
#[derive(Clone)]
pub struct WebSocket {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: Endpoint,
    configuration: Configuration,
    trust: TrustVerifier,
    state: RwLock<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    consumers: ConsumerRegistry,
    /// Command channel of the running session, `None` when disconnected.
    ///
    /// Lock order: `control` before the consumer registry.
    control: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    probe: ConnectivityProbe,
}

impl WebSocket {
    /// Creates a builder for `url`.
    #[inline]
    #[must_use]
    pub fn builder(url: impl Into<String>) -> WebSocketBuilder {
        WebSocketBuilder::new(url)
    }

    pub(crate) fn new(endpoint: Endpoint, configuration: Configuration, trust: TrustVerifier) -> Self {
        let probe = ConnectivityProbe::new(
            endpoint.clone(),
            trust.clone(),
            configuration.reconnect_delay,
            configuration.connect_timeout,
        );
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                endpoint,
                configuration,
                trust,
                state: RwLock::new(ConnectionState::Disconnected),
                state_tx,
                consumers: ConsumerRegistry::new(),
                control: Mutex::new(None),
                probe,
            }),
        }
    }

    /// Attaches a consumer, opening the connection if none is active.
    ///
    /// Calling this while `Pending` or `Connected` joins the existing
    /// connection. A consumer joining a live connection receives
    /// [`Event::Connected`] first.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn connect(&self) -> EventStream {
        let shared = &self.shared;
        let mut control = shared.control.lock();

        let seed = shared.state().is_connected().then_some(Event::Connected);
        let (id, events) = shared.consumers.add_with(seed);

        if control.is_none() {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            *control = Some(command_tx);
            shared.set_state(ConnectionState::Pending);

            info!(endpoint = %shared.endpoint, "Connecting");
            tokio::spawn(Arc::clone(shared).run(command_rx));
        } else {
            debug!(consumer = %id, "Consumer joined existing connection");
        }
        drop(control);

        let owner: Weak<dyn Release> = Arc::downgrade(shared) as Weak<dyn Release>;
        EventStream::new(id, events, owner)
    }

    /// Closes the connection and ends every consumer's stream.
    ///
    /// Errors caused by the teardown itself are not reported. No-op when
    /// already disconnected.
    pub fn disconnect(&self, code: CloseCode) {
        let sent = self.shared.command(Command::Disconnect {
            code,
            cause: Cause::Requested,
        });

        if !sent {
            debug!(endpoint = %self.shared.endpoint, "Disconnect ignored, not connected");
        }
    }

    /// Sends a text frame and waits until it is written.
    ///
    /// # Errors
    ///
    /// - [`Error::NotReachable`] if not `Connected`
    /// - [`Error::Connection`] if the write fails
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_message(Message::Text(text.into().into())).await
    }

    /// Sends a binary frame and waits until it is written.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send_message(Message::Binary(data.into().into())).await
    }

    /// Queues a text frame without waiting for the write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReachable`] if not `Connected`.
    pub fn send_and_forget_text(&self, text: impl Into<String>) -> Result<()> {
        if !self.state().is_connected() {
            return Err(Error::NotReachable);
        }

        let command = Command::Send {
            message: Message::Text(text.into().into()),
            ack: None,
        };

        if self.shared.command(command) {
            Ok(())
        } else {
            Err(Error::NotReachable)
        }
    }

    /// Sends a ping frame.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn ping(&self) -> Result<()> {
        self.send_message(Message::Ping(Vec::new().into())).await
    }

    /// Sends a pong frame, for use when automatic replies are off.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn pong(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_message(Message::Pong(payload.into().into())).await
    }

    /// Returns a snapshot of the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Subscribes to every subsequent state transition.
    #[must_use]
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Returns the state of the connectivity probe.
    #[inline]
    #[must_use]
    pub fn connectivity_state(&self) -> ConnectivityState {
        self.shared.probe.state()
    }

    /// Number of attached consumers.
    #[inline]
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.shared.consumers.len()
    }

    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.shared.configuration
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        if !self.state().is_connected() {
            return Err(Error::NotReachable);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        let command = Command::Send {
            message,
            ack: Some(ack_tx),
        };

        if !self.shared.command(command) {
            return Err(Error::NotReachable);
        }

        // A dropped ack means the session ended before the write
        ack_rx.await.unwrap_or(Err(Error::NotReachable))
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("endpoint", &self.shared.endpoint.to_string())
            .field("state", &self.state())
            .field("consumers", &self.consumer_count())
            .finish()
    }
}

// ============================================================================
// Shared: State
// ============================================================================

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        let previous = *state;
        if previous == next {
            return;
        }

        if !previous.can_transition(next) {
            error!(?previous, ?next, "Illegal state transition");
        }

        *state = next;
        // Published under the lock so observers see transitions in order
        let _ = self.state_tx.send(next);
        debug!(endpoint = %self.endpoint, from = ?previous, to = ?next, "State changed");
    }

    /// Sends a command to the running session. Returns `false` if none.
    fn command(&self, command: Command) -> bool {
        self.control
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok())
    }

    /// Enters `Connected` and tells every consumer.
    ///
    /// Returns `false` if nobody is listening.
    fn enter_connected(&self) -> bool {
        let _control = self.control.lock();
        self.set_state(ConnectionState::Connected);
        self.consumers.broadcast(&Event::Connected)
    }

    /// Ends the session. Returns `false` if the session must start over
    /// because consumers attached while it was closing.
    fn finish(&self, ending: Ending) -> bool {
        let mut control = self.control.lock();
        self.set_state(ConnectionState::Disconnected);

        if ending == Ending::Closed(Cause::LastConsumer) && !self.consumers.is_empty() {
            info!(endpoint = %self.endpoint, "Consumers attached while closing, reconnecting");
            self.set_state(ConnectionState::Pending);
            return false;
        }

        *control = None;
        self.consumers.broadcast(&Event::Disconnected);
        let discarded = self.consumers.discard_all();

        info!(endpoint = %self.endpoint, ?ending, consumers = discarded, "Disconnected");
        true
    }
}

impl Release for Shared {
    fn release(&self, id: ConsumerId) {
        if self.consumers.remove(id) == Membership::BecameEmpty {
            debug!(endpoint = %self.endpoint, consumer = %id, "Last consumer detached");
            self.command(Command::Disconnect {
                code: CloseCode::Away,
                cause: Cause::LastConsumer,
            });
        }
    }
}

// ============================================================================
// Shared: Session Task
// ============================================================================

impl Shared {
    /// Session task body.
    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut keepalive = KeepAlive::new(self.configuration.ping_interval);

        loop {
            let ending = self.session(&mut commands, &mut keepalive).await;
            if self.finish(ending) {
                break;
            }
        }

        // Answer anything sent between the last poll and `finish`
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Send { ack: Some(ack), .. } = command {
                let _ = ack.send(Err(Error::NotReachable));
            }
        }

        trace!(endpoint = %self.endpoint, "Session task terminated");
    }

    /// Dials, pumps, and recovers until the session ends.
    async fn session(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        keepalive: &mut KeepAlive,
    ) -> Ending {
        loop {
            let connecting = dial(
                &self.endpoint,
                &self.trust,
                &self.configuration.headers,
                self.configuration.connect_timeout,
            );

            let dialed = match self.until_disconnect(connecting, commands).await {
                Ok(dialed) => dialed,
                Err(cause) => return Ending::Closed(cause),
            };

            let (err, was_connected) = match dialed {
                Ok(stream) => {
                    if !self.enter_connected() {
                        self.set_state(ConnectionState::Pending);
                        let (sink, source) = stream.split();
                        self.close(sink, source, CloseCode::Away).await;
                        return Ending::Closed(Cause::LastConsumer);
                    }

                    match self.pump(stream, commands, keepalive).await {
                        Ok(cause) => return Ending::Closed(cause),
                        Err(err) => (err, true),
                    }
                }
                Err(err) => (err, false),
            };

            if let Some(ending) = self.recover(err, was_connected, commands).await {
                return ending;
            }
        }
    }

    /// Moves frames until the connection closes or fails.
    ///
    /// Always leaves the state at `Pending`.
    async fn pump(
        &self,
        stream: SocketStream,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        keepalive: &mut KeepAlive,
    ) -> Result<Cause> {
        let (mut sink, mut source) = stream.split();
        keepalive.start();

        let exit = loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(message)) => match self.on_frame(message, keepalive) {
                        Flow::Continue => {}
                        Flow::Deserted => break Exit::Close(CloseCode::Away, Cause::LastConsumer),
                        Flow::PeerClosed => break Exit::PeerClosed,
                    },
                    Some(Err(e)) => break Exit::Failed(e.into()),
                    None => break Exit::Failed(Error::ConnectionClosed),
                },

                command = commands.recv() => match command {
                    Some(Command::Send { message, ack }) => {
                        match sink.send(message).await {
                            Ok(()) => {
                                if let Some(ack) = ack {
                                    let _ = ack.send(Ok(()));
                                }
                            }
                            Err(e) => {
                                if let Some(ack) = ack {
                                    let _ = ack.send(Err(Error::connection(e.to_string())));
                                }
                                break Exit::Failed(e.into());
                            }
                        }
                    }

                    Some(Command::Disconnect { cause: Cause::LastConsumer, .. })
                        if !self.consumers.is_empty() =>
                    {
                        debug!("Stale last-consumer disconnect ignored");
                    }

                    Some(Command::Disconnect { code, cause }) => break Exit::Close(code, cause),

                    None => break Exit::Close(CloseCode::Away, Cause::Requested),
                },

                beat = keepalive.tick() => match beat {
                    Beat::Ping => {
                        trace!(outstanding = keepalive.outstanding(), "Keepalive ping");
                        if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                            break Exit::Failed(e.into());
                        }
                    }
                    Beat::Expired => {
                        warn!(endpoint = %self.endpoint, "Keepalive expired, forcing reconnect");
                        break Exit::Failed(Error::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "no pong received",
                        )));
                    }
                },
            }
        };

        keepalive.stop();
        self.set_state(ConnectionState::Pending);

        match exit {
            Exit::Close(code, cause) => {
                self.close(sink, source, code).await;
                Ok(cause)
            }
            Exit::PeerClosed => {
                // Flushes the close reply queued by the protocol layer
                let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
                Ok(Cause::Remote)
            }
            Exit::Failed(err) => Err(err),
        }
    }

    fn on_frame(&self, message: Message, keepalive: &mut KeepAlive) -> Flow {
        let event = match message {
            Message::Text(text) => {
                trace!(len = text.len(), "Text frame received");
                Event::Text(text.as_str().to_owned())
            }
            Message::Binary(data) => {
                trace!(len = data.len(), "Binary frame received");
                Event::Binary(data.to_vec())
            }
            Message::Ping(data) => {
                trace!("Ping received");
                if self.configuration.auto_reply_ping {
                    return Flow::Continue;
                }
                Event::Ping(data.to_vec())
            }
            Message::Pong(data) => {
                keepalive.on_pong();
                Event::Pong(data.to_vec())
            }
            Message::Close(frame) => {
                debug!(?frame, "Close frame received");
                return Flow::PeerClosed;
            }
            Message::Frame(_) => return Flow::Continue,
        };

        if self.consumers.broadcast(&event) {
            Flow::Continue
        } else {
            Flow::Deserted
        }
    }

    /// Best-effort closing handshake. Errors are expected and ignored.
    async fn close(&self, mut sink: FrameSink, mut source: FrameSource, code: CloseCode) {
        let frame = CloseFrame {
            code,
            reason: Utf8Bytes::from_static(""),
        };

        let handshake = async {
            sink.send(Message::Close(Some(frame))).await?;
            while let Some(message) = source.next().await {
                message?;
            }
            Ok::<_, Error>(())
        };

        match timeout(CLOSE_TIMEOUT, handshake).await {
            Ok(Ok(())) => debug!(endpoint = %self.endpoint, %code, "Connection closed"),
            Ok(Err(e)) => debug!(endpoint = %self.endpoint, error = %e, "Connection closed with error"),
            Err(_) => debug!(endpoint = %self.endpoint, "Close handshake timed out"),
        }
    }

    /// Applies the retry policy to a failure.
    ///
    /// Returns `None` when the connection should be re-dialed.
    async fn recover(
        &self,
        err: Error,
        was_connected: bool,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<Ending> {
        match Failure::classify(&err) {
            Failure::Unreachable | Failure::Reset if !was_connected => {
                debug!(endpoint = %self.endpoint, error = %err, "Dial failed");
            }
            Failure::Unreachable => {
                warn!(endpoint = %self.endpoint, error = %err, "Connection lost");
                if !self.consumers.broadcast(&Event::ViabilityChanged(false)) {
                    return Some(Ending::Closed(Cause::LastConsumer));
                }
            }
            Failure::Reset => {
                warn!(endpoint = %self.endpoint, error = %err, "Connection reset by peer");
                return Some(Ending::Failed);
            }
            Failure::Tls => {
                warn!(endpoint = %self.endpoint, error = %err, "TLS handshake rejected");
                self.consumers.broadcast(&Event::Error(TransportError::Tls {
                    message: err.to_string(),
                }));
            }
            Failure::Fatal => {
                error!(endpoint = %self.endpoint, error = %err, "Unrecoverable transport error");
                self.consumers.broadcast(&Event::Error(TransportError::Protocol {
                    message: err.to_string(),
                }));
                return Some(Ending::Failed);
            }
        }

        let wait = self.probe.wait_for_connectivity();
        tokio::pin!(wait);

        match self.until_disconnect(wait.as_mut(), commands).await {
            Ok(Ok(())) => {
                if !self.consumers.broadcast(&Event::ViabilityChanged(true)) {
                    return Some(Ending::Closed(Cause::LastConsumer));
                }
            }
            Ok(Err(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "Endpoint not reachable, giving up");
                self.consumers.broadcast(&Event::ConnectionError(e));
                return Some(Ending::Failed);
            }
            Err(cause) => {
                self.probe.cancel();
                let outcome = wait.await;
                debug!(?outcome, "Connectivity wait interrupted");
                return Some(Ending::Closed(cause));
            }
        }

        if let Err(cause) = self.until_disconnect(sleep(RESTART_GRACE), commands).await {
            return Some(Ending::Closed(cause));
        }

        debug!(endpoint = %self.endpoint, "Re-dialing");
        None
    }

    /// Drives `future` while answering commands as not `Connected`.
    ///
    /// Returns `Err` with the cause if a disconnect arrives first.
    async fn until_disconnect<F: Future>(
        &self,
        future: F,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> std::result::Result<F::Output, Cause> {
        tokio::pin!(future);

        loop {
            tokio::select! {
                output = &mut future => return Ok(output),

                command = commands.recv() => match command {
                    Some(Command::Send { ack, .. }) => {
                        if let Some(ack) = ack {
                            let _ = ack.send(Err(Error::NotReachable));
                        }
                    }
                    Some(Command::Disconnect { cause: Cause::LastConsumer, .. })
                        if !self.consumers.is_empty() => {}
                    Some(Command::Disconnect { cause, .. }) => return Err(cause),
                    None => return Err(Cause::Requested),
                },
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
