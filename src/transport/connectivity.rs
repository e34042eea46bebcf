//! Connectivity probe.
//!
//! A probe repeatedly opens a disposable TCP (and TLS) connection to the
//! endpoint until one succeeds, independently of the data connection. The
//! transport uses it to decide when re-dialing is worthwhile.
//!
//! # State
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Idle` | no wait outstanding |
//! | `Waiting` | one caller is waiting; a retry loop is running |
//!
//! A second concurrent wait fails with [`ConnectivityError::Invalid`] and
//! leaves the first untouched. [`ConnectivityProbe::cancel`] and dropping the
//! probe both resolve the outstanding wait with
//! [`ConnectivityError::Cancelled`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::Endpoint;
use crate::error::ConnectivityError;

use super::dial::{Failure, open_stream};
use super::tls::TrustVerifier;

// ============================================================================
// Types
// ============================================================================

/// Outcome delivered to the waiting caller.
type Outcome = Result<(), ConnectivityError>;

// ============================================================================
// ConnectivityState
// ============================================================================

/// Probe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    /// No wait outstanding.
    #[default]
    Idle,
    /// A wait is outstanding.
    Waiting,
}

// ============================================================================
// ConnectivityProbe
// ============================================================================

/// Reachability probe for one endpoint.
#[derive(Debug)]
pub struct ConnectivityProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug)]
struct ProbeInner {
    endpoint: Endpoint,
    trust: TrustVerifier,
    reconnect_delay: Option<Duration>,
    connect_timeout: Duration,
    slot: Mutex<Slot>,
}

/// Mutable probe state, guarded by one lock.
#[derive(Debug, Default)]
struct Slot {
    state: ConnectivityState,
    /// Bumped on every wait so stale completions are ignored.
    generation: u64,
    waiter: Option<oneshot::Sender<Outcome>>,
    task: Option<JoinHandle<()>>,
}

impl ConnectivityProbe {
    /// Creates an idle probe.
    #[must_use]
    pub fn new(
        endpoint: Endpoint,
        trust: TrustVerifier,
        reconnect_delay: Option<Duration>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                endpoint,
                trust,
                reconnect_delay,
                connect_timeout,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        self.inner.slot.lock().state
    }

    /// Waits until the endpoint accepts a connection.
    ///
    /// # Errors
    ///
    /// - [`ConnectivityError::Invalid`] if another wait is outstanding
    /// - [`ConnectivityError::Failed`] on the first miss when no retry delay is configured
    /// - [`ConnectivityError::Tls`] if the TLS handshake is rejected
    /// - [`ConnectivityError::Cancelled`] if [`cancel`](Self::cancel) is called
    pub async fn wait_for_connectivity(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();

        let generation = {
            let mut slot = self.inner.slot.lock();
            if slot.state == ConnectivityState::Waiting {
                debug!(endpoint = %self.inner.endpoint, "Connectivity wait already in progress");
                return Err(ConnectivityError::Invalid);
            }

            slot.generation += 1;
            slot.state = ConnectivityState::Waiting;
            slot.waiter = Some(tx);
            slot.task = Some(tokio::spawn(ProbeInner::run(
                Arc::clone(&self.inner),
                slot.generation,
            )));
            slot.generation
        };

        // Returns the probe to Idle if this future is dropped mid-wait
        let _abandon = AbandonGuard {
            inner: &self.inner,
            generation,
        };

        rx.await.unwrap_or(Err(ConnectivityError::Cancelled))
    }

    /// Resolves the outstanding wait with `Cancelled` and stops retrying.
    ///
    /// No-op when idle.
    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

impl Drop for ConnectivityProbe {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

// ============================================================================
// ProbeInner
// ============================================================================

impl ProbeInner {
    /// Retry loop for one wait.
    async fn run(self: Arc<Self>, generation: u64) {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            trace!(endpoint = %self.endpoint, attempt, "Probing connectivity");

            let err = match open_stream(&self.endpoint, &self.trust, self.connect_timeout).await {
                Ok(stream) => {
                    drop(stream);
                    debug!(endpoint = %self.endpoint, attempt, "Endpoint reachable");
                    self.resolve(generation, Ok(()));
                    return;
                }
                Err(err) => err,
            };

            if Failure::classify(&err) == Failure::Tls {
                warn!(endpoint = %self.endpoint, error = %err, "Probe rejected by TLS");
                self.resolve(generation, Err(ConnectivityError::Tls));
                return;
            }

            let Some(delay) = self.reconnect_delay else {
                debug!(endpoint = %self.endpoint, error = %err, "Endpoint unreachable, no retry");
                self.resolve(generation, Err(ConnectivityError::Failed));
                return;
            };

            debug!(
                endpoint = %self.endpoint,
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Endpoint unreachable"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Delivers an outcome if `generation` is still the current wait.
    fn resolve(&self, generation: u64, outcome: Outcome) {
        let waiter = {
            let mut slot = self.slot.lock();
            if slot.generation != generation || slot.state == ConnectivityState::Idle {
                return;
            }
            slot.state = ConnectivityState::Idle;
            // Called from inside the task itself, so just forget the handle
            slot.task = None;
            slot.waiter.take()
        };

        if let Some(waiter) = waiter {
            let _ = waiter.send(outcome);
        }
    }

    fn cancel(&self) {
        let (waiter, task) = {
            let mut slot = self.slot.lock();
            if slot.state == ConnectivityState::Idle {
                return;
            }
            slot.state = ConnectivityState::Idle;
            (slot.waiter.take(), slot.task.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(ConnectivityError::Cancelled));
        }

        debug!(endpoint = %self.endpoint, "Connectivity wait cancelled");
    }
}

// ============================================================================
// AbandonGuard
// ============================================================================

struct AbandonGuard<'a> {
    inner: &'a ProbeInner,
    generation: u64,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let task = {
            let mut slot = self.inner.slot.lock();
            if slot.generation != self.generation || slot.state == ConnectivityState::Idle {
                return;
            }
            slot.state = ConnectivityState::Idle;
            slot.waiter = None;
            slot.task.take()
        };

        if let Some(task) = task {
            task.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    use crate::config::TlsPolicy;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr").port()
    }

    fn probe(port: u16, delay: Option<Duration>) -> ConnectivityProbe {
        let endpoint = Endpoint::parse(&format!("ws://127.0.0.1:{port}")).expect("valid");
        let trust = TrustVerifier::new(&TlsPolicy::Disabled, endpoint.host(), &[]).expect("trust");
        ConnectivityProbe::new(endpoint, trust, delay, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_reachable_resolves_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let probe = probe(port, None);
        assert_eq!(probe.wait_for_connectivity().await, Ok(()));
        assert_eq!(probe.state(), ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn test_unreachable_without_delay_fails() {
        let probe = probe(closed_port().await, None);
        assert_eq!(
            probe.wait_for_connectivity().await,
            Err(ConnectivityError::Failed)
        );
        assert_eq!(probe.state(), ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn test_second_wait_is_invalid_first_unaffected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let probe = Arc::new(probe(port, Some(Duration::from_millis(50))));

        let first = tokio::spawn({
            let probe = Arc::clone(&probe);
            async move { probe.wait_for_connectivity().await }
        });

        while probe.state() != ConnectivityState::Waiting {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            probe.wait_for_connectivity().await,
            Err(ConnectivityError::Invalid)
        );
        assert_eq!(probe.state(), ConnectivityState::Waiting);

        // Bring the endpoint up; the first wait still resolves normally
        let _listener = TcpListener::bind(("127.0.0.1", port)).await.expect("rebind");
        assert_eq!(first.await.expect("join"), Ok(()));
    }

    #[tokio::test]
    async fn test_cancel_resolves_cancelled_and_idles() {
        let probe = Arc::new(probe(closed_port().await, Some(Duration::from_secs(60))));

        let waiter = tokio::spawn({
            let probe = Arc::clone(&probe);
            async move { probe.wait_for_connectivity().await }
        });

        while probe.state() != ConnectivityState::Waiting {
            tokio::task::yield_now().await;
        }
        probe.cancel();

        assert_eq!(waiter.await.expect("join"), Err(ConnectivityError::Cancelled));
        assert_eq!(probe.state(), ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let probe = probe(closed_port().await, None);
        probe.cancel();
        assert_eq!(probe.state(), ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn test_dropped_wait_returns_to_idle() {
        let probe = probe(closed_port().await, Some(Duration::from_secs(60)));

        let wait = probe.wait_for_connectivity();
        let result = tokio::time::timeout(Duration::from_millis(50), wait).await;
        assert!(result.is_err());
        assert_eq!(probe.state(), ConnectivityState::Idle);
    }
}
