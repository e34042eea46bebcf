//! Wallet Socket - persistent WebSocket client engine.
//!
//! This library keeps one full-duplex WebSocket connection to a JSON-RPC
//! backend alive and multiplexes requests, fire-and-forget sends and
//! long-lived subscriptions over it.
//!
//! # Architecture
//!
//! The engine is layered:
//!
//! - **Transport**: one physical connection per [`WebSocket`], driven by a
//!   single session task; TLS pinning, keepalive and connectivity probing
//!   run alongside it
//! - **Request layer**: [`SocketClient`] correlates outbound requests with
//!   inbound frames, queues sends while offline and replays them on
//!   reconnect
//!
//! Key design principles:
//!
//! - One writer per piece of state (session task, correlator mutex)
//! - Every waiter is resolved on teardown; nothing parks forever
//! - The engine owns all retry decisions
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use wallet_socket::{Result, SocketClient, TlsPolicy};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = SocketClient::builder("wss://node.example.com/ws")
//!         .tls(TlsPolicy::pinned_to("node.example.com"))
//!         .build_client()?;
//!
//!     let request = client.rpc("eth_chainId", json!([]))?;
//!     let chain: String = client.send(request).await?.result()?;
//!     println!("Chain: {}", chain);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`SocketClient`], correlator, subscriptions |
//! | [`config`] | [`Endpoint`], [`Configuration`], builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Request and response envelopes |
//! | [`transport`] | [`WebSocket`] transport |

// ============================================================================
// Modules
// ============================================================================

/// Request layer: correlation, subscriptions, typed calls.
pub mod client;

/// Endpoint and connection configuration.
///
/// Use [`WebSocket::builder()`] or [`SocketClient::builder()`].
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Socket message types.
pub mod protocol;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{SocketClient, SocketPath, Subscription, TypedSubscription};

// Config types
pub use config::{Configuration, Endpoint, Scheme, TlsPolicy, WebSocketBuilder};

// Error types
pub use error::{ConnectivityError, Error, RequestError, Result};

// Identifier types
pub use identifiers::{ConsumerId, CorrelationId, PublisherId};

// Protocol types
pub use protocol::{Response, SocketRequest};

// Transport types
pub use transport::{
    CloseCode, ConnectionState, ConnectivityProbe, ConnectivityState, Event, EventStream,
    TransportError, TrustVerifier, WebSocket,
};
