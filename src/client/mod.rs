//! Request layer.
//!
//! Correlates JSON requests and subscriptions with the frames that answer
//! them, across reconnects.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlator` | [`RequestCorrelator`] state machine |
//! | `path` | [`SocketPath`] trait for typed calls |
//! | `socket_client` | [`SocketClient`] |
//! | `subscription` | [`Subscription`] and [`TypedSubscription`] streams |

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation.
pub mod correlator;

/// Typed request paths.
pub mod path;

/// Client over the transport.
pub mod socket_client;

/// Subscription streams.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlator::{FrameOutcome, Outbound, QueuedRequest, Reply, RequestCorrelator, Route, Sink};
pub use path::SocketPath;
pub use socket_client::SocketClient;
pub use subscription::{Subscription, TypedSubscription};
