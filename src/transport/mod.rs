//! WebSocket transport layer.
//!
//! This module owns the single physical connection to the endpoint and
//! everything that keeps it alive.
//!
//! # Architecture
//!
//! ```text
//!  consumers ◄── EventStream ◄── ConsumerRegistry ◄──┐
//!                                                     │ broadcast
//!  WebSocket ── commands ──► session task ────────────┤
//!                              │    │    │            │
//!                          dial│    │    └─ KeepAlive (ping / 3 missed pongs)
//!                              ▼    └────── ConnectivityProbe (retry, backoff)
//!                         TrustVerifier
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connectivity` | Disposable reachability probe with retry |
//! | `consumers` | Consumer registry and [`EventStream`] |
//! | `dial` | TCP/TLS dialing, upgrade, failure classification |
//! | `event` | [`Event`] and [`ConnectionState`] |
//! | `keepalive` | Ping timer and pong accounting |
//! | `socket` | [`WebSocket`] and its session task |
//! | `tls` | [`TrustVerifier`] and certificate pinning |

// ============================================================================
// Submodules
// ============================================================================

/// Connectivity probe.
pub mod connectivity;

/// Consumer fan-out.
pub mod consumers;

/// Dialing and failure classification.
pub mod dial;

/// Transport events and connection state.
pub mod event;

/// Keepalive timer.
pub mod keepalive;

/// WebSocket transport.
pub mod socket;

/// TLS trust evaluation.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use connectivity::{ConnectivityProbe, ConnectivityState};
pub use consumers::{ConsumerRegistry, EventStream, Membership};
pub use dial::Failure;
pub use event::{ConnectionState, Event, TransportError};
pub use keepalive::{Beat, KeepAlive, MAX_MISSED_PONGS};
pub use socket::WebSocket;
pub use tls::{PinnedVerifier, TrustVerifier};

pub use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
