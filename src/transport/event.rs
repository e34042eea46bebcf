//! Transport events and connection state.

// ============================================================================
// Imports
// ============================================================================

use thiserror::Error;

use crate::error::ConnectivityError;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the data connection.
///
/// ```text
/// Disconnected ──connect──► Pending ──ready──► Connected
///      ▲                     │  ▲                  │
///      └──── terminal ───────┘  └── lost / close ──┘
/// ```
///
/// `Pending` is never skipped in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and no reconnect in progress.
    #[default]
    Disconnected,
    /// Dialing, waiting for connectivity, or closing.
    Pending,
    /// Upgrade complete; frames flow.
    Connected,
}

impl ConnectionState {
    /// Returns `true` if `self -> next` is a legal transition.
    #[inline]
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Pending)
                | (Self::Pending, Self::Connected)
                | (Self::Pending, Self::Disconnected)
                | (Self::Connected, Self::Pending)
        )
    }

    /// Returns `true` for [`ConnectionState::Connected`].
    #[inline]
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// Error surfaced to consumers through [`Event::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// TLS handshake rejected. The transport keeps retrying via the probe.
    #[error("TLS error: {message}")]
    Tls {
        /// Underlying verification error.
        message: String,
    },

    /// Unrecoverable protocol or upgrade failure. The session ends.
    #[error("protocol error: {message}")]
    Protocol {
        /// Underlying error.
        message: String,
    },
}

// ============================================================================
// Event
// ============================================================================

/// Event broadcast to every consumer of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The connection reached `Connected`.
    Connected,
    /// The session ended. No further events follow.
    Disconnected,
    /// Network path usability changed while the transport keeps retrying.
    ViabilityChanged(bool),
    /// Peer ping, only when automatic replies are off.
    Ping(Vec<u8>),
    /// Peer pong.
    Pong(Vec<u8>),
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Transport error.
    Error(TransportError),
    /// Endpoint unreachable and the probe gave up. `Disconnected` follows.
    ConnectionError(ConnectivityError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use ConnectionState::{Connected, Disconnected, Pending};

    #[test]
    fn test_legal_transitions() {
        assert!(Disconnected.can_transition(Pending));
        assert!(Pending.can_transition(Connected));
        assert!(Connected.can_transition(Pending));
        assert!(Pending.can_transition(Disconnected));
    }

    #[test]
    fn test_pending_never_skipped() {
        assert!(!Disconnected.can_transition(Connected));
        assert!(!Connected.can_transition(Disconnected));
    }

    #[test]
    fn test_self_transitions_rejected() {
        for state in [Disconnected, Pending, Connected] {
            assert!(!state.can_transition(state));
        }
    }

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), Disconnected);
        assert!(!ConnectionState::default().is_connected());
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Tls {
            message: "UnknownIssuer".to_string(),
        };
        assert_eq!(err.to_string(), "TLS error: UnknownIssuer");
    }
}
