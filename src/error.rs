//! Error types for the socket engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use wallet_socket::{Result, SocketClient};
//!
//! async fn example(client: &SocketClient) -> Result<()> {
//!     let request = client.rpc("eth_blockNumber", serde_json::json!([]))?;
//!     let response = client.send(request).await?;
//!     println!("{}", response.as_str());
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Type / Variants |
//! |----------|-----------------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Transport | [`Error::NotReachable`], [`Error::Tls`], [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Connectivity | [`ConnectivityError`] via [`Error::Connectivity`] |
//! | Correlator | [`RequestError`] via [`Error::Request`] |
//! | Remote | [`Error::Rpc`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CorrelationId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// ConnectivityError
// ============================================================================

/// Outcome of a failed connectivity wait.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    /// The wait was cancelled or the probe was dropped.
    #[error("connectivity wait cancelled")]
    Cancelled,

    /// The endpoint is unreachable and no retry delay is configured.
    #[error("endpoint unreachable")]
    Failed,

    /// A wait is already in progress on this probe.
    #[error("connectivity wait already in progress")]
    Invalid,

    /// The TLS handshake was rejected; pinning failures are never retried.
    #[error("TLS verification failed")]
    Tls,
}

// ============================================================================
// RequestError
// ============================================================================

/// Failure delivered to a single pending caller.
///
/// `Clone` because a single disconnect fans the same error out to every
/// affected request and subscription.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Frame or request payload is not a JSON object with a usable `id`.
    #[error("malformed payload")]
    BadFormat,

    /// The connection went away before a response arrived.
    #[error("no connection")]
    NoConnection,

    /// The connection was re-established; server-side subscription state is
    /// gone and the caller should resubscribe.
    ///
    /// This is a soft signal. The subscription stream stays open.
    #[error("connection re-established, resubscribe required")]
    Connected,

    /// Another request with the same correlation ID is still pending.
    #[error("duplicate correlation id: {0}")]
    DuplicateId(CorrelationId),

    /// Response did not arrive in time.
    #[error("request {id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The request that timed out.
        id: CorrelationId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },
}

impl RequestError {
    /// Returns `true` for the soft resubscribe signal.
    #[inline]
    #[must_use]
    pub fn is_resubscribe(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Endpoint URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The transport is not in the `Connected` state.
    #[error("Endpoint not reachable")]
    NotReachable,

    /// TLS handshake or certificate verification failed.
    #[error("TLS error: {message}")]
    Tls {
        /// Underlying verification error.
        message: String,
    },

    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// Connectivity probe failure.
    #[error("Connectivity error: {0}")]
    Connectivity(#[from] ConnectivityError),

    /// Correlator failure for a specific request.
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    /// JSON-RPC error object returned by the peer.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates an RPC error.
    #[inline]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Request(RequestError::Timeout { .. }))
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotReachable
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Request(RequestError::NoConnection)
        )
    }

    /// Returns `true` if this is a TLS failure at any layer.
    #[inline]
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(
            self,
            Self::Tls { .. } | Self::Connectivity(ConnectivityError::Tls)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotReachable
                | Self::Request(
                    RequestError::NoConnection
                        | RequestError::Connected
                        | RequestError::Timeout { .. }
                )
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
